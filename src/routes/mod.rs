//! Routes gateway (EMBP).
//!
//! Sibling modules each export a subrouter; this module merges them and
//! attaches the shared [`AppState`]. It also owns the pieces every city
//! handler needs: the JSON error type and the cached history loader.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::QueryRejection;
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;

use crate::cache::SeriesCache;
use crate::collector::OpenAqCollector;
use crate::error::CoreError;
use crate::models::MeasurementSeries;
use crate::store::PgStore;
use crate::Config;

mod alerts;
mod current;
mod forecast;
mod health;
mod report;
mod risk;

// ---

/// Label stored with measurements fetched through the collector.
const DATA_SOURCE: &str = "API";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub store: PgStore,
    pub config: Config,
    pub collector: Arc<OpenAqCollector>,
    pub cache: Arc<SeriesCache>,
}

impl AppState {
    // ---
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        // ---
        let collector = OpenAqCollector::from_config(&config)?;
        let mut cache = SeriesCache::new().with_max_entries(config.cache_max_entries);
        if config.cache_ttl_secs > 0 {
            cache = cache.with_max_age(Duration::from_secs(config.cache_ttl_secs));
        }

        Ok(Self {
            store: PgStore::new(pool),
            config,
            collector: Arc::new(collector),
            cache: Arc::new(cache),
        })
    }
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(current::router())
        .merge(forecast::router())
        .merge(risk::router())
        .merge(report::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state(state)
}

// ---

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub(crate) enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        // ---
        if e.is_no_data() {
            ApiError::NotFound(e.to_string())
        } else {
            ApiError::Internal(e.into())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                tracing::error!("Request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// History for `city`.
///
/// Served from the cache when fresh, then from stored rows when they cover
/// the window. Otherwise the collector is asked and its rows are persisted
/// (best-effort). Whatever is served gets cached.
pub(crate) async fn load_series(state: &AppState, city: &str) -> Arc<MeasurementSeries> {
    // ---
    let days = state.config.history_days;
    if let Some(series) = state.cache.get(city, days) {
        tracing::debug!("Cache hit for {city} ({days} days)");
        return series;
    }

    match stored_series(state, city, days).await {
        Some(series) => {
            tracing::debug!("Serving {} stored rows for {city}", series.len());
            return state.cache.insert(days, series);
        }
        None => tracing::debug!("Stored history for {city} is incomplete, collecting"),
    }

    let series = state.collector.get_historical(city, days).await;
    if let Err(e) = state.store.save_measurements(series.rows(), DATA_SOURCE).await {
        tracing::warn!("Could not persist measurements for {city}: {e:#}");
    }
    state.cache.insert(days, series)
}

async fn stored_series(state: &AppState, city: &str, days: u32) -> Option<MeasurementSeries> {
    // ---
    let rows = match state.store.historical_measurements(city, days).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("Could not read stored history for {city}: {e:#}");
            return None;
        }
    };
    let series = MeasurementSeries::new(city, rows).ok()?;
    series.covers_window(days, Utc::now()).then_some(series)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use axum::extract::Query;
    use axum::http::Uri;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Debug, Deserialize)]
    struct AqiQuery {
        #[allow(dead_code)]
        aqi: Option<f64>,
    }

    async fn body_json(response: Response) -> Value {
        // ---
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn malformed_query_is_a_json_bad_request() {
        // ---
        let uri: Uri = "/cities/Delhi/risk?aqi=abc".parse().unwrap();
        let rejection = Query::<AqiQuery>::try_from_uri(&uri).unwrap_err();

        let response = ApiError::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("query string"), "{message}");
    }

    #[tokio::test]
    async fn no_data_maps_to_not_found() {
        // ---
        let err = CoreError::InsufficientData {
            context: "test",
            required: 48,
            available: 0,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].is_string());
    }
}
