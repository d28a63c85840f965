use anyhow::Result;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;

use airquality_health::aqi::DEFAULT_AQI;
use airquality_health::collector::{OpenAqCollector, SyntheticSource};
use airquality_health::features::FeatureEngineer;
use airquality_health::forecast::{ArimaForecaster, ForestParams, TreeEnsembleForecaster};
use airquality_health::risk::{HealthReport, RiskScorer};
use airquality_health::{Config, CoreError, Measurement, MeasurementSeries};

// ---

fn delhi_month() -> Result<MeasurementSeries> {
    // ---
    let end = Utc.with_ymd_and_hms(2025, 11, 15, 12, 0, 0).unwrap();
    let rows: Vec<Measurement> = SyntheticSource::seeded(7)
        .historical("Delhi", end, 30)
        .iter()
        .map(|r| r.to_measurement(DEFAULT_AQI))
        .collect();
    Ok(MeasurementSeries::new("Delhi", rows)?)
}

#[test]
fn delhi_month_trains_tree_ensemble_end_to_end() -> Result<()> {
    // ---
    let series = delhi_month()?;
    assert_eq!(series.len(), 30 * 24 + 1);

    let table = FeatureEngineer::default().build_features(&series);
    assert_eq!(table.len(), series.len() - 24);

    let params = ForestParams {
        n_estimators: 20,
        ..ForestParams::default()
    };
    let (model, metrics) = TreeEnsembleForecaster::new(params).train(&table, "aqi")?;

    assert!(metrics.mae.is_finite(), "mae = {}", metrics.mae);
    assert!(metrics.rmse.is_finite(), "rmse = {}", metrics.rmse);
    assert!(metrics.r2.is_some_and(f64::is_finite));
    assert!(metrics.n_train > metrics.n_test);

    let prediction = model.predict_latest(&table)?;
    let f = prediction.forecast;
    assert!(f.predicted_aqi >= 0.0);
    assert!(f.lower_bound >= 0.0 && f.lower_bound <= f.predicted_aqi);
    assert!(f.upper_bound >= f.predicted_aqi);
    assert!(!prediction.feature_importances.is_empty());

    Ok(())
}

#[test]
fn delhi_month_fits_arima_end_to_end() -> Result<()> {
    // ---
    let series = delhi_month()?;
    let (model, metrics) = ArimaForecaster::new().train(&series, "aqi")?;
    assert!(metrics.aic.is_some_and(f64::is_finite));

    let out = model.forecast(24);
    assert_eq!(out.forecasts.len(), 24);
    assert!(out.next_day_average >= 0.0);
    for (i, f) in out.forecasts.iter().enumerate() {
        assert_eq!(f.horizon_step, i + 1);
        assert!(f.predicted_aqi >= 0.0);
        assert!(f.lower_bound <= f.upper_bound);
    }

    Ok(())
}

#[test]
fn two_days_is_too_short_for_arima() -> Result<()> {
    // ---
    let end = Utc.with_ymd_and_hms(2025, 11, 15, 12, 0, 0).unwrap();
    let rows: Vec<Measurement> = SyntheticSource::seeded(1)
        .historical("Mumbai", end, 1)
        .iter()
        .map(|r| r.to_measurement(DEFAULT_AQI))
        .collect();
    let series = MeasurementSeries::new("Mumbai", rows)?;

    let err = ArimaForecaster::new().train(&series, "aqi").unwrap_err();
    assert!(matches!(err, CoreError::InsufficientData { .. }));
    assert!(err.is_no_data());

    Ok(())
}

#[test]
fn report_scores_risk_at_period_average() -> Result<()> {
    // ---
    let series = delhi_month()?;
    let today = Utc.with_ymd_and_hms(2025, 11, 15, 0, 0, 0).unwrap().date_naive();
    let report = HealthReport::build("Delhi", today, series.rows()).expect("report");

    let expected = RiskScorer::new().score(report.impact.average_aqi, "Delhi");
    assert_eq!(report.risk, expected);
    assert_eq!(report.impact.total_readings, series.len());
    assert!(!report.recommendations.is_empty());

    Ok(())
}

#[test]
fn collector_falls_back_to_synthetic_when_api_is_down() -> Result<()> {
    // ---
    let cfg = Config {
        db_url: "postgres://localhost/unused".into(),
        db_pool_max: 1,
        // Nothing listens on the discard port
        openaq_api_url: "http://127.0.0.1:9".into(),
        openaq_api_key: None,
        history_days: 2,
        http_timeout_secs: 1,
        default_aqi: DEFAULT_AQI,
        bind_port: 0,
        cache_ttl_secs: 0,
        cache_max_entries: 4,
    };
    let collector = OpenAqCollector::from_config(&cfg)?.with_synthetic(SyntheticSource::seeded(3));

    let series = tokio_test::block_on(collector.get_historical("Chennai", 2));
    assert_eq!(series.city(), "Chennai");
    assert_eq!(series.len(), 2 * 24 + 1);

    let current = tokio_test::block_on(collector.get_current("Chennai")).expect("synthetic reading");
    assert_eq!(current.city, "Chennai");
    assert!(current.aqi > 0.0);

    Ok(())
}

// --- HTTP tests; run with a live server: `cargo test -- --ignored`

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore]
async fn health_endpoint_is_ok() -> Result<()> {
    // ---
    let body: Value = Client::new()
        .get(format!("{}/health", base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn current_endpoint_returns_categorised_reading() -> Result<()> {
    // ---
    let url = format!("{}/cities/Delhi/current", base_url());
    let body: Value = Client::new().get(&url).send().await?.json().await?;

    let aqi = body["measurement"]["aqi"].as_f64().expect("aqi");
    assert!(aqi >= 0.0, "AQI from {} was {}", url, aqi);
    assert!(body["label"].as_str().is_some());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn forecast_endpoint_serves_both_models() -> Result<()> {
    // ---
    let client = Client::new();

    let tree: Value = client
        .get(format!("{}/cities/Delhi/forecast?model=tree", base_url()))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(tree["forecasts"].as_array().map(Vec::len), Some(1));

    let arima: Value = client
        .get(format!("{}/cities/Delhi/forecast?model=arima&steps=12", base_url()))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(arima["forecasts"].as_array().map(Vec::len), Some(12));

    let bad = client
        .get(format!("{}/cities/Delhi/forecast?model=prophet", base_url()))
        .send()
        .await?;
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
#[ignore]
async fn risk_endpoint_raises_alert_when_unhealthy() -> Result<()> {
    // ---
    let body: Value = Client::new()
        .get(format!("{}/cities/Mumbai/risk?aqi=220", base_url()))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    assert_eq!(body["assessment"]["city"], "Mumbai");
    assert_eq!(body["alert"]["severity"], "very_unhealthy");
    assert!(body["recommendations"].as_array().is_some_and(|r| !r.is_empty()));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn repeated_risk_queries_reuse_the_open_alert() -> Result<()> {
    // ---
    let client = Client::new();
    let url = format!("{}/cities/Pune/risk?aqi=320", base_url());

    let first: Value = client.get(&url).send().await?.error_for_status()?.json().await?;
    let second: Value = client.get(&url).send().await?.error_for_status()?.json().await?;

    let id = first["alert_id"].as_i64().expect("alert id");
    assert_eq!(second["alert_id"].as_i64(), Some(id));
    assert_eq!(second["alert_is_new"], false);

    let open: Value = client
        .get(format!("{}/alerts?city=Pune", base_url()))
        .send()
        .await?
        .json()
        .await?;
    let hazardous = open
        .as_array()
        .map(|a| a.iter().filter(|r| r["severity"] == "hazardous").count());
    assert_eq!(hazardous, Some(1));

    client
        .post(format!("{}/alerts/{id}/acknowledge", base_url()))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn malformed_query_gets_json_error() -> Result<()> {
    // ---
    let response = Client::new()
        .get(format!("{}/cities/Delhi/risk?aqi=abc", base_url()))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let body: Value = response.json().await?;
    assert!(body["error"].as_str().is_some());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn report_endpoint_builds_todays_report() -> Result<()> {
    // ---
    let body: Value = Client::new()
        .get(format!("{}/cities/Kolkata/report", base_url()))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    assert_eq!(body["report"]["city"], "Kolkata");
    assert!(body["report"]["impact"]["average_aqi"].as_f64().is_some());
    Ok(())
}
