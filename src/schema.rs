//! Database schema management for `airquality-health`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

const STATEMENTS: [&str; 8] = [
    // Measurements with derived AQI, unique per (city, timestamp, location)
    r#"
    CREATE TABLE IF NOT EXISTS air_quality_measurements (
        id          BIGSERIAL PRIMARY KEY,
        city        TEXT             NOT NULL,
        timestamp   TIMESTAMPTZ      NOT NULL,
        location    TEXT             NOT NULL,
        latitude    DOUBLE PRECISION,
        longitude   DOUBLE PRECISION,
        aqi         DOUBLE PRECISION NOT NULL,
        pm25        DOUBLE PRECISION,
        pm10        DOUBLE PRECISION,
        no2         DOUBLE PRECISION,
        so2         DOUBLE PRECISION,
        o3          DOUBLE PRECISION,
        co          DOUBLE PRECISION,
        data_source TEXT             NOT NULL,
        created_at  TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
        UNIQUE (city, timestamp, location)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS air_quality_predictions (
        id            UUID PRIMARY KEY,
        city          TEXT             NOT NULL,
        generated_at  TIMESTAMPTZ      NOT NULL,
        target_date   TIMESTAMPTZ      NOT NULL,
        model_kind    TEXT             NOT NULL,
        predicted_aqi DOUBLE PRECISION NOT NULL,
        interval_low  DOUBLE PRECISION NOT NULL,
        interval_high DOUBLE PRECISION NOT NULL,
        metrics       JSONB
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS air_quality_alerts (
        id                  BIGSERIAL PRIMARY KEY,
        city                TEXT             NOT NULL,
        kind                TEXT             NOT NULL,
        severity            TEXT             NOT NULL,
        aqi_value           DOUBLE PRECISION NOT NULL,
        threshold_exceeded  DOUBLE PRECISION NOT NULL,
        affected_groups     JSONB            NOT NULL,
        people_affected     BIGINT           NOT NULL,
        recommendation_text TEXT             NOT NULL,
        triggered_at        TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
        acknowledged        BOOLEAN          NOT NULL DEFAULT FALSE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS health_impact_reports (
        id                     BIGSERIAL PRIMARY KEY,
        city                   TEXT             NOT NULL,
        report_date            DATE             NOT NULL,
        average_aqi            DOUBLE PRECISION NOT NULL,
        health_risk_score      DOUBLE PRECISION NOT NULL,
        total_people_at_risk   BIGINT           NOT NULL,
        excess_deaths_annual   BIGINT           NOT NULL,
        excess_illness_cases   BIGINT           NOT NULL,
        economic_impact_inr    DOUBLE PRECISION NOT NULL,
        vulnerable_populations JSONB            NOT NULL,
        recommendations        TEXT             NOT NULL,
        created_at             TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
        UNIQUE (city, report_date)
    );
    "#,
    // Indexes for the per-city time-window queries
    r#"
    CREATE INDEX IF NOT EXISTS idx_measurements_city_time
        ON air_quality_measurements (city, timestamp);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_predictions_city_generated
        ON air_quality_predictions (city, generated_at);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alerts_triggered
        ON air_quality_alerts (triggered_at) WHERE NOT acknowledged;
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_reports_date
        ON health_impact_reports (report_date);
    "#,
];

/// Create or update the database schema (idempotent).
///
/// Creates the measurement, prediction, alert and health report tables
/// plus their indexes. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::debug!("Schema ready ({} statements)", STATEMENTS.len());
    Ok(())
}
