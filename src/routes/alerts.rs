//! Stored alerts.
//!
//! - `GET /alerts?city=&hours=N`: unacknowledged alerts, newest first
//! - `POST /alerts/{id}/acknowledge`: mark one acknowledged

use axum::extract::rejection::QueryRejection;
use axum::{
    extract::Path, extract::Query, extract::State, http::StatusCode, routing::get, routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiError, ApiResult, AppState};
use crate::store::StoredAlert;

// ---

const DEFAULT_HOURS: u32 = 24;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/alerts", get(list_handler))
        .route("/alerts/{id}/acknowledge", post(acknowledge_handler))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    city: Option<String>,
    hours: Option<u32>,
}

async fn list_handler(
    query: Result<Query<AlertsQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<StoredAlert>>> {
    // ---
    let Query(params) = query?;
    let hours = params.hours.unwrap_or(DEFAULT_HOURS);
    let rows = state
        .store
        .active_alerts(params.city.as_deref(), hours)
        .await?;
    Ok(Json(rows))
}

async fn acknowledge_handler(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    // ---
    info!("POST /alerts/{id}/acknowledge");

    if state.store.acknowledge_alert(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No alert with id {id}")))
    }
}
