//! Data models shared by the core, the collector and the store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aqi;
use crate::error::{CoreError, CoreResult};

// ---

/// Pollutant concentrations for one reading. Absent pollutants are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Concentrations {
    // ---
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub o3: Option<f64>,
    pub co: Option<f64>,
}

impl Concentrations {
    // ---
    /// Drop negative and non-finite values.
    pub fn sanitized(self) -> Self {
        // ---
        let keep = |v: Option<f64>| v.filter(|c| c.is_finite() && *c >= 0.0);
        Concentrations {
            pm25: keep(self.pm25),
            pm10: keep(self.pm10),
            no2: keep(self.no2),
            so2: keep(self.so2),
            o3: keep(self.o3),
            co: keep(self.co),
        }
    }

    /// Set a pollutant by its OpenAQ parameter name; unknown names are ignored.
    pub fn set(&mut self, parameter: &str, value: f64) {
        // ---
        match parameter {
            "pm25" => self.pm25 = Some(value),
            "pm10" => self.pm10 = Some(value),
            "no2" => self.no2 = Some(value),
            "so2" => self.so2 = Some(value),
            "o3" => self.o3 = Some(value),
            "co" => self.co = Some(value),
            _ => {}
        }
    }
}

/// A reading before AQI derivation, as produced by a data source.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeasurement {
    // ---
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub pollutants: Concentrations,
}

/// A reading with its derived AQI. Identity key is `(city, timestamp, location)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurement {
    // ---
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub pollutants: Concentrations,
    pub aqi: f64,
}

impl RawMeasurement {
    // ---
    /// Derive the AQI and freeze the reading.
    pub fn to_measurement(&self, default_aqi: f64) -> Measurement {
        // ---
        let pollutants = self.pollutants.sanitized();
        let aqi = aqi::aqi_from_concentrations_or(&pollutants, default_aqi);

        Measurement {
            timestamp: self.timestamp,
            city: self.city.clone(),
            location: self.location.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            pollutants,
            aqi,
        }
    }
}

impl Measurement {
    // ---
    /// Value of a named numeric column (`pm25` ... `co`, `aqi`).
    pub fn value(&self, column: &str) -> Option<f64> {
        // ---
        let p = &self.pollutants;
        match column {
            "pm25" => p.pm25,
            "pm10" => p.pm10,
            "no2" => p.no2,
            "so2" => p.so2,
            "o3" => p.o3,
            "co" => p.co,
            "aqi" => Some(self.aqi),
            _ => None,
        }
    }
}

/// Stored history whose newest row is older than this many hours is refetched.
pub const MAX_HISTORY_LAG_HOURS: i64 = 2;

/// Share of the hourly slots in a window that stored history must fill.
pub const MIN_HOURLY_COVERAGE: f64 = 0.75;

/// Numeric measurement columns in table order.
pub const MEASUREMENT_COLUMNS: [&str; 7] = ["pm25", "pm10", "no2", "so2", "o3", "co", "aqi"];

/// Time-ordered measurements for a single city.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasurementSeries {
    city: String,
    rows: Vec<Measurement>,
}

impl MeasurementSeries {
    // ---
    /// Build a series, stable-sorting by timestamp.
    ///
    /// Fails with [`CoreError::MixedSeries`] if any row belongs to another city.
    pub fn new(city: impl Into<String>, mut rows: Vec<Measurement>) -> CoreResult<Self> {
        // ---
        let city = city.into();
        if let Some(other) = rows.iter().find(|m| m.city != city) {
            return Err(CoreError::MixedSeries {
                expected: city,
                found: other.city.clone(),
            });
        }
        rows.sort_by_key(|m| m.timestamp);
        Ok(Self { city, rows })
    }

    /// An empty series; the "no data" answer of a collector.
    pub fn empty(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            rows: Vec::new(),
        }
    }

    /// Split a mixed table into one series per city.
    pub fn group_by_city(rows: Vec<Measurement>) -> Vec<MeasurementSeries> {
        // ---
        let mut grouped: BTreeMap<String, Vec<Measurement>> = BTreeMap::new();
        for m in rows {
            grouped.entry(m.city.clone()).or_default().push(m);
        }
        grouped
            .into_iter()
            .map(|(city, mut rows)| {
                rows.sort_by_key(|m| m.timestamp);
                MeasurementSeries { city, rows }
            })
            .collect()
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn rows(&self) -> &[Measurement] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&Measurement> {
        self.rows.last()
    }

    /// Whether this series is good enough to stand in for a fresh fetch of
    /// the last `days` days as of `now`.
    ///
    /// The newest row must be within [`MAX_HISTORY_LAG_HOURS`] of `now` and at
    /// least [`MIN_HOURLY_COVERAGE`] of the window's hours must hold a row.
    pub fn covers_window(&self, days: u32, now: DateTime<Utc>) -> bool {
        // ---
        let Some(latest) = self.latest() else {
            return false;
        };
        if now - latest.timestamp > Duration::hours(MAX_HISTORY_LAG_HOURS) {
            return false;
        }

        let since = now - Duration::days(i64::from(days));
        let hours: BTreeSet<DateTime<Utc>> = self
            .rows
            .iter()
            .filter(|m| m.timestamp >= since)
            .map(|m| {
                m.timestamp
                    .duration_trunc(Duration::hours(1))
                    .unwrap_or(m.timestamp)
            })
            .collect();

        let expected = f64::from(days) * 24.0;
        hours.len() as f64 >= expected * MIN_HOURLY_COVERAGE
    }

    /// Mean of a column over rows where it is present.
    pub fn mean_of(&self, column: &str) -> Option<f64> {
        // ---
        let values: Vec<f64> = self.rows.iter().filter_map(|m| m.value(column)).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Resample a column onto a uniform hourly grid.
    ///
    /// Values within the same hour are averaged. Hours with no observation
    /// carry the last known value forward, which understates volatility
    /// during gaps. Leading hours before the first observation of the column
    /// are skipped.
    pub fn resample_hourly(&self, column: &str) -> Vec<(DateTime<Utc>, f64)> {
        // ---
        let mut buckets: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
        for m in &self.rows {
            let Some(value) = m.value(column) else {
                continue;
            };
            let hour = m
                .timestamp
                .duration_trunc(Duration::hours(1))
                .unwrap_or(m.timestamp);
            let entry = buckets.entry(hour).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return Vec::new();
        };

        let mut grid = Vec::new();
        let mut carried = f64::NAN;
        let mut hour = first;
        while hour <= last {
            if let Some((sum, count)) = buckets.get(&hour) {
                carried = sum / *count as f64;
            }
            grid.push((hour, carried));
            hour += Duration::hours(1);
        }
        grid
    }
}

/// A single forecast point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    // ---
    pub horizon_step: usize,
    pub target_timestamp: Option<DateTime<Utc>>,
    pub predicted_aqi: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Which forecasting family produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TreeEnsemble,
    Arima,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::TreeEnsemble => "tree_ensemble",
            ModelKind::Arima => "arima",
        }
    }
}

/// Forecast as handed to the store and the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastRecord {
    // ---
    pub id: Uuid,
    pub city: String,
    pub generated_at: DateTime<Utc>,
    pub target_date: DateTime<Utc>,
    pub model_kind: ModelKind,
    pub predicted_aqi: f64,
    pub interval_low: f64,
    pub interval_high: f64,
    /// Opaque fit diagnostics (MAE, R², AIC, ...).
    pub metrics: serde_json::Value,
}

impl ForecastRecord {
    // ---
    pub fn from_forecast(
        city: &str,
        model_kind: ModelKind,
        generated_at: DateTime<Utc>,
        forecast: &Forecast,
        metrics: serde_json::Value,
    ) -> Self {
        // ---
        ForecastRecord {
            id: Uuid::new_v4(),
            city: city.to_string(),
            generated_at,
            target_date: forecast
                .target_timestamp
                .unwrap_or(generated_at + Duration::hours(forecast.horizon_step as i64)),
            model_kind,
            predicted_aqi: forecast.predicted_aqi,
            interval_low: forecast.lower_bound,
            interval_high: forecast.upper_bound,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn raw(city: &str, hour: u32, pm25: Option<f64>) -> RawMeasurement {
        // ---
        RawMeasurement {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, hour, 15, 0).unwrap(),
            city: city.to_string(),
            location: format!("{city} Central"),
            latitude: Some(28.6139),
            longitude: Some(77.2090),
            pollutants: Concentrations {
                pm25,
                ..Concentrations::default()
            },
        }
    }

    #[test]
    fn aqi_is_derived_on_conversion() {
        // ---
        let m = raw("Delhi", 10, Some(35.4)).to_measurement(aqi::DEFAULT_AQI);
        assert!((m.aqi - 100.0).abs() < 1e-9);
        assert_eq!(m.value("aqi"), Some(m.aqi));
        assert_eq!(m.value("pm25"), Some(35.4));
        assert_eq!(m.value("so2"), None);
    }

    #[test]
    fn missing_pollutants_use_default() {
        // ---
        let m = raw("Delhi", 10, None).to_measurement(120.0);
        assert_eq!(m.aqi, 120.0);
    }

    #[test]
    fn negative_concentrations_are_dropped() {
        // ---
        let m = raw("Delhi", 10, Some(-1.0)).to_measurement(aqi::DEFAULT_AQI);
        assert_eq!(m.pollutants.pm25, None);
    }

    #[test]
    fn series_sorts_and_rejects_other_cities() {
        // ---
        let rows = vec![
            raw("Delhi", 12, Some(40.0)).to_measurement(100.0),
            raw("Delhi", 9, Some(20.0)).to_measurement(100.0),
        ];
        let series = MeasurementSeries::new("Delhi", rows).unwrap();
        assert!(series.rows()[0].timestamp < series.rows()[1].timestamp);

        let mixed = vec![
            raw("Delhi", 9, Some(20.0)).to_measurement(100.0),
            raw("Mumbai", 9, Some(20.0)).to_measurement(100.0),
        ];
        let err = MeasurementSeries::new("Delhi", mixed.clone()).unwrap_err();
        assert!(matches!(err, CoreError::MixedSeries { .. }));

        let grouped = MeasurementSeries::group_by_city(mixed);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].city(), "Delhi");
    }

    #[test]
    fn resample_averages_and_forward_fills() {
        // ---
        let mut second = raw("Delhi", 9, Some(30.0));
        second.timestamp = Utc.with_ymd_and_hms(2025, 3, 26, 9, 45, 0).unwrap();
        let rows = vec![
            raw("Delhi", 9, Some(10.0)).to_measurement(100.0),
            second.to_measurement(100.0),
            raw("Delhi", 12, Some(50.0)).to_measurement(100.0),
        ];
        let series = MeasurementSeries::new("Delhi", rows).unwrap();
        let grid = series.resample_hourly("pm25");

        let values: Vec<f64> = grid.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![20.0, 20.0, 20.0, 50.0]);
        assert_eq!(grid[1].0 - grid[0].0, Duration::hours(1));
    }

    fn hourly_delhi(end: DateTime<Utc>, hours: i64) -> MeasurementSeries {
        // ---
        let rows = (0..hours)
            .map(|h| {
                let mut r = raw("Delhi", 0, Some(40.0));
                r.timestamp = end - Duration::hours(h);
                r.to_measurement(100.0)
            })
            .collect();
        MeasurementSeries::new("Delhi", rows).unwrap()
    }

    #[test]
    fn stored_history_must_be_recent_and_dense() {
        // ---
        let now = Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap();

        let full = hourly_delhi(now, 48);
        assert!(full.covers_window(2, now));

        // 30 of 48 hours is below the coverage floor
        let sparse = hourly_delhi(now, 30);
        assert!(!sparse.covers_window(2, now));

        let stale = hourly_delhi(now - Duration::hours(3), 48);
        assert!(!stale.covers_window(2, now));

        assert!(!MeasurementSeries::empty("Delhi").covers_window(2, now));
    }
}
