//! `GET /cities/{city}/risk?aqi=X`
//!
//! Scores vulnerable-group risk at the given AQI, or at the current reading
//! when `aqi` is omitted. Alert-worthy assessments are recorded as alerts,
//! unless an open alert for the city already covers them.

use axum::extract::rejection::QueryRejection;
use axum::{extract::Path, extract::Query, extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ApiError, ApiResult, AppState};
use crate::alerts::{self, AlertEvent, AlertThresholds, REPEAT_WINDOW_HOURS};
use crate::risk::{self, RiskAssessment, RiskScorer, VulnerabilityIndex};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/cities/{city}/risk", get(handler))
}

#[derive(Debug, Deserialize)]
struct RiskQuery {
    aqi: Option<f64>,
}

#[derive(Serialize)]
struct RiskResponse {
    assessment: RiskAssessment,
    vulnerability: Option<VulnerabilityIndex>,
    recommendations: Vec<String>,
    alert: Option<AlertEvent>,
    alert_id: Option<i64>,
    /// False when `alert_id` points at an already-open alert.
    alert_is_new: bool,
}

async fn handler(
    Path(city): Path<String>,
    query: Result<Query<RiskQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> ApiResult<Json<RiskResponse>> {
    // ---
    let Query(params) = query?;
    info!("GET /cities/{city}/risk - {:?}", params);

    let aqi = match params.aqi {
        Some(aqi) if aqi.is_finite() && aqi >= 0.0 => aqi,
        Some(aqi) => {
            return Err(ApiError::BadRequest(format!(
                "aqi must be a non-negative number, got {aqi}"
            )))
        }
        None => state
            .collector
            .get_current(&city)
            .await
            .map(|m| m.aqi)
            .ok_or_else(|| ApiError::NotFound(format!("No current reading for {city}")))?,
    };

    let assessment = RiskScorer::new().score(aqi, &city);
    let alert = alerts::evaluate(&assessment, &AlertThresholds::default());

    let (alert_id, alert_is_new) = match &alert {
        Some(event) => record_alert(&state, event).await,
        None => (None, false),
    };

    Ok(Json(RiskResponse {
        vulnerability: risk::vulnerability_index(&city, aqi),
        recommendations: risk::recommendations(aqi, &city),
        assessment,
        alert,
        alert_id,
        alert_is_new,
    }))
}

/// Persist `event` unless an open alert already covers it. Returns the id
/// of the alert that stands for it and whether that alert is new.
async fn record_alert(state: &AppState, event: &AlertEvent) -> (Option<i64>, bool) {
    // ---
    let city = &event.city;
    match state
        .store
        .active_alerts(Some(city.as_str()), REPEAT_WINDOW_HOURS)
        .await
    {
        Ok(open) => {
            if let Some(existing) = open
                .iter()
                .find(|a| event.is_repeat_of(&a.city, &a.kind, &a.severity))
            {
                debug!("Alert {} already covers {city}", existing.id);
                return (Some(existing.id), false);
            }
        }
        Err(e) => warn!("Could not check open alerts for {city}: {e:#}"),
    }

    match state.store.create_alert(event).await {
        Ok(id) => (Some(id), true),
        Err(e) => {
            warn!("Could not persist alert for {city}: {e:#}");
            (None, false)
        }
    }
}
