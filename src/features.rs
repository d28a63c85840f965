//! Feature engineering for the forecasting models.
//!
//! Turns one city's [`MeasurementSeries`] into a model-ready [`FeatureTable`]:
//! raw pollutant columns, calendar fields, lagged values, trailing rolling
//! statistics and placeholder weather covariates. Every engineered value at
//! row `i` depends only on rows `<= i`.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::models::{MeasurementSeries, MEASUREMENT_COLUMNS};

// ---

/// Calendar fields derived from the timestamp.
pub const TEMPORAL_COLUMNS: [&str; 4] = ["hour", "day_of_week", "month", "day_of_year"];

/// Placeholder weather covariates, standing in for a real weather feed.
pub const WEATHER_COLUMNS: [&str; 3] = ["temp_estimate", "humidity_estimate", "wind_speed_estimate"];

/// Which columns get lags and rolling windows, and how deep they go.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    // ---
    pub sources: Vec<String>,
    pub lag_periods: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub weather_seed: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sources: ["pm25", "pm10", "no2", "aqi"].map(String::from).to_vec(),
            lag_periods: vec![1, 3, 6, 12, 24],
            rolling_windows: vec![6, 12, 24],
            weather_seed: 42,
        }
    }
}

impl FeatureConfig {
    // ---
    /// Rows discarded at the start of a series before every field is defined.
    pub fn warm_up(&self) -> usize {
        // ---
        let max_lag = self.lag_periods.iter().copied().max().unwrap_or(0);
        let max_window = self.rolling_windows.iter().copied().max().unwrap_or(1);
        max_lag.max(max_window.saturating_sub(1))
    }
}

/// One model-ready row. Identifiers are kept out of `values`.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRow {
    // ---
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub location: String,
    pub values: Vec<f64>,
}

/// Ordered feature columns plus the rows that have all of them defined.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    // ---
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Empty means "insufficient data", not an error.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of a named column at a row, if both exist.
    pub fn get(&self, row: usize, column: &str) -> Option<f64> {
        // ---
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| r.values[idx])
    }

    /// Rename a column in place; returns `false` if it does not exist.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        // ---
        match self.column_index(from) {
            Some(idx) => {
                self.columns[idx] = to.to_string();
                true
            }
            None => false,
        }
    }
}

/// Builds feature tables from measurement series.
#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    // ---
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Build the feature table for a single-city series.
    ///
    /// Returns an empty table when the series is shorter than the warm-up.
    pub fn build_features(&self, series: &MeasurementSeries) -> FeatureTable {
        // ---
        let rows = series.rows();

        // Lags and windows only for sources that were observed at all
        let sources: Vec<&str> = self
            .config
            .sources
            .iter()
            .map(String::as_str)
            .filter(|col| rows.iter().any(|m| m.value(col).is_some()))
            .collect();

        let columns = self.column_names(&sources);

        let source_values: Vec<Vec<f64>> = sources
            .iter()
            .map(|col| {
                rows.iter()
                    .map(|m| m.value(col).unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.config.weather_seed);
        let mut out = Vec::new();

        for (i, m) in rows.iter().enumerate() {
            // Draw for every row so the noise sequence does not depend on which
            // rows survive the warm-up
            let wind_noise: f64 = rng.gen::<f64>();

            let mut values = Vec::with_capacity(columns.len());
            values.extend(
                MEASUREMENT_COLUMNS
                    .iter()
                    .map(|col| m.value(col).unwrap_or(f64::NAN)),
            );

            let ts = m.timestamp;
            values.push(f64::from(ts.hour()));
            values.push(f64::from(ts.weekday().num_days_from_monday()));
            values.push(f64::from(ts.month()));
            values.push(f64::from(ts.ordinal()));

            let mut complete = true;

            for &k in &self.config.lag_periods {
                for series_values in &source_values {
                    let lag = i.checked_sub(k).map_or(f64::NAN, |j| series_values[j]);
                    complete &= lag.is_finite();
                    values.push(lag);
                }
            }

            for &w in &self.config.rolling_windows {
                for series_values in &source_values {
                    let (mean, std) = trailing_stats(series_values, i, w);
                    complete &= mean.is_finite() && std.is_finite();
                    values.push(mean);
                    values.push(std);
                }
            }

            if !complete {
                continue;
            }

            let (temp, humidity, wind) = weather_estimate(ts, wind_noise);
            values.extend([temp, humidity, wind]);

            out.push(FeatureRow {
                timestamp: ts,
                city: m.city.clone(),
                location: m.location.clone(),
                values,
            });
        }

        tracing::debug!(
            "Built {} feature rows from {} measurements for {}",
            out.len(),
            rows.len(),
            series.city()
        );

        FeatureTable { columns, rows: out }
    }

    fn column_names(&self, sources: &[&str]) -> Vec<String> {
        // ---
        let mut columns: Vec<String> = MEASUREMENT_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(TEMPORAL_COLUMNS.iter().map(|c| c.to_string()));

        for k in &self.config.lag_periods {
            for col in sources {
                columns.push(format!("{col}_lag_{k}"));
            }
        }
        for w in &self.config.rolling_windows {
            for col in sources {
                columns.push(format!("{col}_rolling_mean_{w}"));
                columns.push(format!("{col}_rolling_std_{w}"));
            }
        }
        columns.extend(WEATHER_COLUMNS.iter().map(|c| c.to_string()));
        columns
    }
}

/// Mean and sample standard deviation of `values[i+1-w ..= i]`.
///
/// Undefined (NaN) when fewer than `w` rows exist or any value is missing.
fn trailing_stats(values: &[f64], i: usize, w: usize) -> (f64, f64) {
    // ---
    if w == 0 || i + 1 < w {
        return (f64::NAN, f64::NAN);
    }
    let window = &values[i + 1 - w..=i];
    if window.iter().any(|v| !v.is_finite()) {
        return (f64::NAN, f64::NAN);
    }

    let mean = window.iter().sum::<f64>() / w as f64;
    let std = if w < 2 {
        f64::NAN
    } else {
        let ss: f64 = window.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (w - 1) as f64).sqrt()
    };
    (mean, std)
}

/// Smooth diurnal/seasonal weather placeholders plus bounded wind noise.
fn weather_estimate(ts: DateTime<Utc>, noise: f64) -> (f64, f64, f64) {
    // ---
    let hour = f64::from(ts.hour());
    let day_of_year = f64::from(ts.ordinal());

    let temp = 25.0 + 10.0 * (2.0 * PI * hour / 24.0).sin() + 5.0 * (2.0 * PI * day_of_year / 365.0).sin();
    let humidity = 60.0 + 20.0 * (2.0 * PI * (hour + 6.0) / 24.0).sin();
    let wind = 5.0 + 3.0 * noise;
    (temp, humidity, wind)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{Concentrations, Measurement};
    use chrono::{Duration, TimeZone};

    fn hourly_series(n: usize) -> MeasurementSeries {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let rows = (0..n)
            .map(|i| Measurement {
                timestamp: start + Duration::hours(i as i64),
                city: "Delhi".to_string(),
                location: "Delhi Central".to_string(),
                latitude: None,
                longitude: None,
                pollutants: Concentrations {
                    pm25: Some(100.0 + i as f64),
                    pm10: Some(150.0 + 2.0 * i as f64),
                    no2: Some(40.0),
                    ..Concentrations::default()
                },
                aqi: 150.0 + (i % 7) as f64,
            })
            .collect();
        MeasurementSeries::new("Delhi", rows).unwrap()
    }

    #[test]
    fn drops_warm_up_rows() {
        // ---
        let engineer = FeatureEngineer::default();
        assert_eq!(engineer.config().warm_up(), 24);

        let table = engineer.build_features(&hourly_series(100));
        assert_eq!(table.len(), 100 - 24);
        assert_eq!(table.rows[0].values.len(), table.columns.len());
    }

    #[test]
    fn short_series_yields_empty_table() {
        // ---
        let table = FeatureEngineer::default().build_features(&hourly_series(24));
        assert!(table.is_empty());
        assert!(!table.columns.is_empty());
    }

    #[test]
    fn lags_point_backwards() {
        // ---
        let table = FeatureEngineer::default().build_features(&hourly_series(60));
        // First surviving row is series index 24, pm25 = 124
        assert_eq!(table.get(0, "pm25"), Some(124.0));
        assert_eq!(table.get(0, "pm25_lag_1"), Some(123.0));
        assert_eq!(table.get(0, "pm25_lag_24"), Some(100.0));
        assert_eq!(table.get(5, "pm10_lag_3"), Some(150.0 + 2.0 * 26.0));
    }

    #[test]
    fn no_look_ahead() {
        // ---
        let base = hourly_series(60);
        let full = FeatureEngineer::default().build_features(&base);

        // Corrupt every row after index 40 and rebuild
        let mut rows = base.rows().to_vec();
        for m in rows.iter_mut().skip(41) {
            m.pollutants.pm25 = Some(9999.0);
            m.aqi = 9999.0;
        }
        let altered = FeatureEngineer::default()
            .build_features(&MeasurementSeries::new("Delhi", rows).unwrap());

        // Series row 40 is feature row 16; everything up to it must be unchanged
        for r in 0..=16 {
            assert_eq!(full.rows[r].values, altered.rows[r].values, "row {r} changed");
        }
        assert_ne!(full.rows[17].values, altered.rows[17].values);
    }

    #[test]
    fn rolling_stats_match_window() {
        // ---
        let table = FeatureEngineer::default().build_features(&hourly_series(40));
        // Row 0 is series index 24; pm25 window of 6 is 119..=124
        let mean = table.get(0, "pm25_rolling_mean_6").unwrap();
        let std = table.get(0, "pm25_rolling_std_6").unwrap();
        assert!((mean - 121.5).abs() < 1e-9);
        assert!((std - 3.5_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn unobserved_sources_are_not_engineered() {
        // ---
        let table = FeatureEngineer::default().build_features(&hourly_series(30));
        assert!(table.column_index("so2").is_some());
        assert!(table.column_index("so2_lag_1").is_none());
        assert!(table.column_index("no2_lag_1").is_some());
    }

    #[test]
    fn weather_is_deterministic_and_bounded() {
        // ---
        let a = FeatureEngineer::default().build_features(&hourly_series(50));
        let b = FeatureEngineer::default().build_features(&hourly_series(50));
        for r in 0..a.len() {
            let wind = a.get(r, "wind_speed_estimate").unwrap();
            assert!((5.0..8.0).contains(&wind));
            assert_eq!(Some(wind), b.get(r, "wind_speed_estimate"));
        }
        let humidity = a.get(0, "humidity_estimate").unwrap();
        assert!((40.0..=80.0).contains(&humidity));
    }

    #[test]
    fn temporal_fields_come_from_timestamp() {
        // ---
        let table = FeatureEngineer::default().build_features(&hourly_series(30));
        // Index 24 is 2025-01-02 00:00, a Thursday
        assert_eq!(table.get(0, "hour"), Some(0.0));
        assert_eq!(table.get(0, "day_of_week"), Some(3.0));
        assert_eq!(table.get(0, "month"), Some(1.0));
        assert_eq!(table.get(0, "day_of_year"), Some(2.0));
    }
}
