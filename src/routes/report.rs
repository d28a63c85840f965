//! Health impact reports.
//!
//! - `GET /cities/{city}/report`: build today's report from the city's
//!   history and upsert it
//! - `GET /cities/{city}/quality?days=N`: stored-data coverage
//! - `GET /reports?city=&days=N`: stored reports, newest first

use axum::extract::rejection::QueryRejection;
use axum::{extract::Path, extract::Query, extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{load_series, ApiError, ApiResult, AppState};
use crate::risk::HealthReport;
use crate::store::{DataQualityStats, StoredHealthReport};

// ---

const QUALITY_DAYS: u32 = 7;
const REPORT_DAYS: u32 = 30;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/cities/{city}/report", get(handler))
        .route("/cities/{city}/quality", get(quality_handler))
        .route("/reports", get(list_handler))
}

#[derive(Serialize)]
struct ReportResponse {
    report: HealthReport,
    report_id: Option<i64>,
}

async fn handler(
    Path(city): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<ReportResponse>> {
    // ---
    info!("GET /cities/{city}/report");

    let series = load_series(&state, &city).await;
    let report = HealthReport::build(&city, Utc::now().date_naive(), series.rows())
        .ok_or_else(|| ApiError::NotFound(format!("No measurements for {city}")))?;

    let report_id = match state.store.save_health_report(&report).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Could not persist health report for {city}: {e:#}");
            None
        }
    };

    Ok(Json(ReportResponse { report, report_id }))
}

#[derive(Debug, Deserialize)]
struct QualityQuery {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReportsQuery {
    city: Option<String>,
    days: Option<u32>,
}

async fn quality_handler(
    Path(city): Path<String>,
    query: Result<Query<QualityQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> ApiResult<Json<DataQualityStats>> {
    // ---
    let Query(params) = query?;
    let days = params.days.unwrap_or(QUALITY_DAYS);
    let stats = state.store.data_quality_stats(&city, days).await?;
    Ok(Json(stats))
}

async fn list_handler(
    query: Result<Query<ReportsQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<StoredHealthReport>>> {
    // ---
    let Query(params) = query?;
    let days = params.days.unwrap_or(REPORT_DAYS);
    let rows = state
        .store
        .health_reports(params.city.as_deref(), days)
        .await?;
    Ok(Json(rows))
}
