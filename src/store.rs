//! PostgreSQL persistence for measurements, forecasts, alerts and reports.
//!
//! Thin async wrappers over sqlx queries against the tables created by
//! [`crate::schema::create_schema`]. Nothing here computes; failures are
//! propagated to the caller with context.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::alerts::AlertEvent;
use crate::models::{ForecastRecord, Measurement};
use crate::risk::HealthReport;

// ---

/// A stored forecast row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredForecast {
    // ---
    pub id: uuid::Uuid,
    pub city: String,
    pub generated_at: DateTime<Utc>,
    pub target_date: DateTime<Utc>,
    pub model_kind: String,
    pub predicted_aqi: f64,
    pub interval_low: f64,
    pub interval_high: f64,
    pub metrics: Option<serde_json::Value>,
}

/// A stored alert row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredAlert {
    // ---
    pub id: i64,
    pub city: String,
    pub kind: String,
    pub severity: String,
    pub aqi_value: f64,
    pub threshold_exceeded: f64,
    pub affected_groups: serde_json::Value,
    pub people_affected: i64,
    pub recommendation_text: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// A stored health report row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredHealthReport {
    // ---
    pub id: i64,
    pub city: String,
    pub report_date: NaiveDate,
    pub average_aqi: f64,
    pub health_risk_score: f64,
    pub total_people_at_risk: i64,
    pub excess_deaths_annual: i64,
    pub excess_illness_cases: i64,
    pub economic_impact_inr: f64,
    pub vulnerable_populations: serde_json::Value,
    pub recommendations: String,
}

/// Coverage summary of stored measurements for one city.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct DataQualityStats {
    // ---
    pub total_records: i64,
    pub days_with_data: i64,
    pub avg_aqi: Option<f64>,
    pub max_aqi: Option<f64>,
    pub min_aqi: Option<f64>,
    /// Share of rows with a PM2.5 reading, in percent.
    pub pm25_completeness: Option<f64>,
    pub data_sources: Option<Vec<String>>,
}

/// Postgres-backed store. Cheap to clone; shares the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert measurements on `(city, timestamp, location)`.
    ///
    /// Runs in one transaction; returns the number of rows written.
    pub async fn save_measurements(
        &self,
        measurements: &[Measurement],
        data_source: &str,
    ) -> Result<usize> {
        // ---
        if measurements.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for m in measurements {
            let p = &m.pollutants;
            sqlx::query(
                r#"
                INSERT INTO air_quality_measurements (
                    city, timestamp, location, latitude, longitude,
                    aqi, pm25, pm10, no2, so2, o3, co, data_source
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (city, timestamp, location) DO UPDATE SET
                    aqi = EXCLUDED.aqi,
                    pm25 = EXCLUDED.pm25,
                    pm10 = EXCLUDED.pm10,
                    no2 = EXCLUDED.no2,
                    so2 = EXCLUDED.so2,
                    o3 = EXCLUDED.o3,
                    co = EXCLUDED.co,
                    data_source = EXCLUDED.data_source
                "#,
            )
            .bind(&m.city)
            .bind(m.timestamp)
            .bind(&m.location)
            .bind(m.latitude)
            .bind(m.longitude)
            .bind(m.aqi)
            .bind(p.pm25)
            .bind(p.pm10)
            .bind(p.no2)
            .bind(p.so2)
            .bind(p.o3)
            .bind(p.co)
            .bind(data_source)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert measurement for {}", m.city))?;
        }
        tx.commit().await?;

        tracing::debug!("Stored {} measurements from {}", measurements.len(), data_source);
        Ok(measurements.len())
    }

    /// Measurements for `city` from the last `days` days, oldest first.
    pub async fn historical_measurements(&self, city: &str, days: u32) -> Result<Vec<Measurement>> {
        // ---
        let since = Utc::now() - Duration::days(i64::from(days));
        let rows = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT timestamp, city, location, latitude, longitude,
                   pm25, pm10, no2, so2, o3, co, aqi
            FROM air_quality_measurements
            WHERE city = $1 AND timestamp >= $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(city)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load history for {city}"))?;

        Ok(rows)
    }

    pub async fn save_forecast(&self, record: &ForecastRecord) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO air_quality_predictions (
                id, city, generated_at, target_date, model_kind,
                predicted_aqi, interval_low, interval_high, metrics
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.city)
        .bind(record.generated_at)
        .bind(record.target_date)
        .bind(record.model_kind.as_str())
        .bind(record.predicted_aqi)
        .bind(record.interval_low)
        .bind(record.interval_high)
        .bind(&record.metrics)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store forecast for {}", record.city))?;

        Ok(())
    }

    /// Forecasts generated for `city` in the last `days` days, newest first.
    pub async fn recent_forecasts(&self, city: &str, days: u32) -> Result<Vec<StoredForecast>> {
        // ---
        let since = Utc::now() - Duration::days(i64::from(days));
        let rows = sqlx::query_as::<_, StoredForecast>(
            r#"
            SELECT id, city, generated_at, target_date, model_kind,
                   predicted_aqi, interval_low, interval_high, metrics
            FROM air_quality_predictions
            WHERE city = $1 AND generated_at >= $2
            ORDER BY generated_at DESC
            "#,
        )
        .bind(city)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent forecasts")?;

        Ok(rows)
    }

    /// Insert an alert and return its id.
    pub async fn create_alert(&self, event: &AlertEvent) -> Result<i64> {
        // ---
        let groups = serde_json::to_value(&event.affected_groups)?;
        let people = i64::try_from(event.people_affected).unwrap_or(i64::MAX);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO air_quality_alerts (
                city, kind, severity, aqi_value, threshold_exceeded,
                affected_groups, people_affected, recommendation_text
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&event.city)
        .bind(&event.kind)
        .bind(event.severity.as_str())
        .bind(event.aqi_value)
        .bind(event.threshold_exceeded)
        .bind(groups)
        .bind(people)
        .bind(&event.recommendation_text)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to create alert for {}", event.city))?;

        tracing::info!("Alert {} raised for {} ({})", id, event.city, event.severity.as_str());
        Ok(id)
    }

    /// Unacknowledged alerts from the last `hours` hours, newest first.
    pub async fn active_alerts(&self, city: Option<&str>, hours: u32) -> Result<Vec<StoredAlert>> {
        // ---
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let rows = sqlx::query_as::<_, StoredAlert>(
            r#"
            SELECT id, city, kind, severity, aqi_value, threshold_exceeded,
                   affected_groups, people_affected, recommendation_text,
                   triggered_at, acknowledged
            FROM air_quality_alerts
            WHERE ($1::TEXT IS NULL OR city = $1)
              AND triggered_at >= $2
              AND acknowledged = FALSE
            ORDER BY triggered_at DESC
            "#,
        )
        .bind(city)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load active alerts")?;

        Ok(rows)
    }

    /// Mark an alert acknowledged. Returns whether it existed.
    pub async fn acknowledge_alert(&self, id: i64) -> Result<bool> {
        // ---
        let result = sqlx::query("UPDATE air_quality_alerts SET acknowledged = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to acknowledge alert {id}"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Upsert a report on `(city, report_date)` and return its id.
    pub async fn save_health_report(&self, report: &HealthReport) -> Result<i64> {
        // ---
        let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        let groups = serde_json::to_value(&report.risk.groups)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO health_impact_reports (
                city, report_date, average_aqi, health_risk_score,
                total_people_at_risk, excess_deaths_annual, excess_illness_cases,
                economic_impact_inr, vulnerable_populations, recommendations
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (city, report_date) DO UPDATE SET
                average_aqi = EXCLUDED.average_aqi,
                health_risk_score = EXCLUDED.health_risk_score,
                total_people_at_risk = EXCLUDED.total_people_at_risk,
                excess_deaths_annual = EXCLUDED.excess_deaths_annual,
                excess_illness_cases = EXCLUDED.excess_illness_cases,
                economic_impact_inr = EXCLUDED.economic_impact_inr,
                vulnerable_populations = EXCLUDED.vulnerable_populations,
                recommendations = EXCLUDED.recommendations
            RETURNING id
            "#,
        )
        .bind(&report.city)
        .bind(report.report_date)
        .bind(report.impact.average_aqi)
        .bind(report.risk.final_risk)
        .bind(as_i64(report.risk.total_at_risk))
        .bind(as_i64(report.impact.excess_deaths_annual))
        .bind(as_i64(report.impact.excess_respiratory_cases))
        .bind(report.impact.economic_impact_inr)
        .bind(groups)
        .bind(report.recommendation_text())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to store health report for {}", report.city))?;

        Ok(id)
    }

    /// Reports dated within the last `days` days, newest first.
    pub async fn health_reports(
        &self,
        city: Option<&str>,
        days: u32,
    ) -> Result<Vec<StoredHealthReport>> {
        // ---
        let since = Utc::now().date_naive() - Duration::days(i64::from(days));
        let rows = sqlx::query_as::<_, StoredHealthReport>(
            r#"
            SELECT id, city, report_date, average_aqi, health_risk_score,
                   total_people_at_risk, excess_deaths_annual, excess_illness_cases,
                   economic_impact_inr, vulnerable_populations, recommendations
            FROM health_impact_reports
            WHERE ($1::TEXT IS NULL OR city = $1) AND report_date >= $2
            ORDER BY report_date DESC
            "#,
        )
        .bind(city)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load health reports")?;

        Ok(rows)
    }

    /// Record counts and AQI range for `city` over the last `days` days.
    pub async fn data_quality_stats(&self, city: &str, days: u32) -> Result<DataQualityStats> {
        // ---
        let since = Utc::now() - Duration::days(i64::from(days));
        let stats = sqlx::query_as::<_, DataQualityStats>(
            r#"
            SELECT
                COUNT(*)::BIGINT                               AS total_records,
                COUNT(DISTINCT DATE(timestamp))::BIGINT        AS days_with_data,
                AVG(aqi)::DOUBLE PRECISION                     AS avg_aqi,
                MAX(aqi)                                       AS max_aqi,
                MIN(aqi)                                       AS min_aqi,
                (COUNT(pm25) * 100.0 / NULLIF(COUNT(*), 0))::DOUBLE PRECISION
                                                               AS pm25_completeness,
                ARRAY_AGG(DISTINCT data_source)
                    FILTER (WHERE data_source IS NOT NULL)     AS data_sources
            FROM air_quality_measurements
            WHERE city = $1 AND timestamp >= $2
            "#,
        )
        .bind(city)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to compute data quality for {city}"))?;

        Ok(stats)
    }
}
