//! `GET /cities/{city}/forecast?model=tree|arima&steps=N`
//!
//! Trains a fresh model on the city's history and forecasts from it.
//! Training is CPU-bound, so it runs on the blocking pool. Models are not
//! kept between requests; the response describes the one that was fitted.
//! Forecasts are persisted best-effort; a store failure never fails the
//! request.

use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::rejection::QueryRejection;
use axum::{extract::Path, extract::Query, extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{load_series, ApiError, ApiResult, AppState};
use crate::error::CoreResult;
use crate::features::FeatureEngineer;
use crate::forecast::{
    ArimaForecaster, ForecastSummary, ForestParams, ModelInfo, TrainingMetrics,
    TreeEnsembleForecaster,
};
use crate::models::{Forecast, ForecastRecord, MeasurementSeries, ModelKind};
use crate::store::StoredForecast;

// ---

const TARGET: &str = "aqi";
const DEFAULT_STEPS: usize = 24;
const MAX_STEPS: usize = 168;
const TOP_FEATURES: usize = 10;
const RECENT_DAYS: u32 = 7;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/cities/{city}/forecast", get(handler))
        .route("/cities/{city}/forecasts", get(recent_handler))
}

#[derive(Debug, Deserialize)]
struct ForecastQuery {
    model: Option<String>,
    steps: Option<usize>,
}

#[derive(Serialize)]
struct ForecastResponse {
    city: String,
    model: ModelKind,
    forecasts: Vec<Forecast>,
    summary: Option<ForecastSummary>,
    metrics: TrainingMetrics,
    model_info: ModelInfo,
    /// Tree ensemble only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    feature_importances: Vec<(String, f64)>,
}

struct Trained {
    forecasts: Vec<Forecast>,
    metrics: TrainingMetrics,
    model_info: ModelInfo,
    feature_importances: Vec<(String, f64)>,
}

fn parse_model(raw: Option<&str>) -> ApiResult<ModelKind> {
    // ---
    match raw.map(str::to_ascii_lowercase).as_deref() {
        None | Some("tree") | Some("tree_ensemble") => Ok(ModelKind::TreeEnsemble),
        Some("arima") => Ok(ModelKind::Arima),
        Some(other) => Err(ApiError::BadRequest(format!(
            "Unknown model `{other}`; expected `tree` or `arima`"
        ))),
    }
}

/// Train and forecast synchronously. Runs inside `spawn_blocking`.
fn train_and_forecast(
    series: &MeasurementSeries,
    kind: ModelKind,
    steps: usize,
) -> CoreResult<Trained> {
    // ---
    match kind {
        ModelKind::TreeEnsemble => {
            let table = FeatureEngineer::default().build_features(series);
            let (model, metrics) =
                TreeEnsembleForecaster::new(ForestParams::default()).train(&table, TARGET)?;
            let prediction = model.predict_latest(&table)?;
            Ok(Trained {
                forecasts: vec![prediction.forecast],
                metrics,
                model_info: model.info(),
                feature_importances: prediction
                    .feature_importances
                    .into_iter()
                    .take(TOP_FEATURES)
                    .collect(),
            })
        }
        ModelKind::Arima => {
            let (model, metrics) = ArimaForecaster::new().train(series, TARGET)?;
            let output = model.forecast(steps);
            Ok(Trained {
                forecasts: output.forecasts,
                metrics,
                model_info: model.info(),
                feature_importances: Vec::new(),
            })
        }
    }
}

async fn handler(
    Path(city): Path<String>,
    query: Result<Query<ForecastQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> ApiResult<Json<ForecastResponse>> {
    // ---
    let Query(params) = query?;
    info!("GET /cities/{city}/forecast - {:?}", params);

    let kind = parse_model(params.model.as_deref())?;
    let steps = params.steps.unwrap_or(DEFAULT_STEPS).clamp(1, MAX_STEPS);

    // Step 1: history
    let series = load_series(&state, &city).await;
    if series.is_empty() {
        return Err(ApiError::NotFound(format!("No history for {city}")));
    }
    let current_aqi = series.latest().map(|m| m.aqi).unwrap_or_default();

    // Step 2: train and forecast off the async runtime
    debug!("Training {} on {} rows for {}", kind.as_str(), series.len(), city);
    let training_series = Arc::clone(&series);
    let trained = tokio::task::spawn_blocking(move || {
        train_and_forecast(&training_series, kind, steps)
    })
    .await
    .map_err(|e| anyhow!("Training task failed: {e}"))??;

    // Step 3: persist, best-effort
    let generated_at = Utc::now();
    let metrics_json = trained.metrics.to_json();
    for forecast in &trained.forecasts {
        let record =
            ForecastRecord::from_forecast(&city, kind, generated_at, forecast, metrics_json.clone());
        if let Err(e) = state.store.save_forecast(&record).await {
            warn!("Could not persist forecast for {city}: {e:#}");
            break;
        }
    }

    let summary = ForecastSummary::from_forecasts(current_aqi, &trained.forecasts);
    info!(
        "Forecast complete for {city}: {} steps, {}",
        trained.forecasts.len(),
        kind.as_str()
    );

    Ok(Json(ForecastResponse {
        city,
        model: kind,
        forecasts: trained.forecasts,
        summary,
        metrics: trained.metrics,
        model_info: trained.model_info,
        feature_importances: trained.feature_importances,
    }))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    days: Option<u32>,
}

/// `GET /cities/{city}/forecasts?days=N`: stored forecasts, newest first.
async fn recent_handler(
    Path(city): Path<String>,
    query: Result<Query<RecentQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<StoredForecast>>> {
    // ---
    let Query(params) = query?;
    let days = params.days.unwrap_or(RECENT_DAYS);
    let rows = state.store.recent_forecasts(&city, days).await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn model_names_are_parsed() {
        // ---
        assert_eq!(parse_model(None).unwrap(), ModelKind::TreeEnsemble);
        assert_eq!(parse_model(Some("tree")).unwrap(), ModelKind::TreeEnsemble);
        assert_eq!(parse_model(Some("ARIMA")).unwrap(), ModelKind::Arima);
        assert!(matches!(
            parse_model(Some("prophet")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn short_history_is_no_data() {
        // ---
        let err = train_and_forecast(&MeasurementSeries::empty("Delhi"), ModelKind::Arima, 24)
            .err()
            .unwrap();
        assert!(err.is_no_data());
    }
}
