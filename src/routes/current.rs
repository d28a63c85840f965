//! `GET /cities/{city}/current`: latest reading with its AQI category.

use axum::{extract::Path, extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use super::{ApiError, ApiResult, AppState};
use crate::aqi::AqiCategory;
use crate::models::Measurement;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/cities/{city}/current", get(handler))
}

#[derive(Serialize)]
struct CurrentResponse {
    measurement: Measurement,
    category: AqiCategory,
    label: &'static str,
    color: &'static str,
    health_message: &'static str,
}

async fn handler(
    Path(city): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<CurrentResponse>> {
    // ---
    info!("GET /cities/{city}/current");

    let measurement = state
        .collector
        .get_current(&city)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No current reading for {city}")))?;

    let category = AqiCategory::from_aqi(measurement.aqi);
    Ok(Json(CurrentResponse {
        measurement,
        category,
        label: category.label(),
        color: category.color(),
        health_message: category.health_message(),
    }))
}
