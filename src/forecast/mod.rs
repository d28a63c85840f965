//! Forecasting models and their shared evaluation helpers.
//!
//! Two families share the same contract: a training call returns an owned
//! trained model plus [`TrainingMetrics`], and prediction is a pure function
//! of that model and its input. Retraining produces a new value instead of
//! mutating one shared predictor.

pub mod arima;
pub mod forest;
pub mod tree;

use serde::Serialize;

use crate::models::Forecast;

pub use arima::{ArimaForecast, ArimaForecaster, TrainedArima, AR_ORDER, MA_ORDER};
pub use forest::{ForestParams, TrainedForest, TreeEnsembleForecaster, TreePrediction};

// ---

/// Shape of a trained model, reported next to its forecasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelInfo {
    TreeEnsemble {
        target: String,
        n_estimators: usize,
        max_depth: usize,
        min_samples_split: usize,
        min_samples_leaf: usize,
        n_features: usize,
        seed: u64,
    },
    Arima {
        target: String,
        /// `(p, d, q)`
        order: (usize, usize, usize),
        ar: [f64; AR_ORDER],
        ma: [f64; MA_ORDER],
        sigma2: f64,
        n_obs: usize,
    },
}

/// Fit-quality report. Fields a model family does not produce are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingMetrics {
    // ---
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: Option<f64>,
    pub aic: Option<f64>,
    pub bic: Option<f64>,
    pub log_likelihood: Option<f64>,
    pub n_train: usize,
    pub n_test: usize,
}

impl TrainingMetrics {
    // ---
    /// MAE/MSE/RMSE/R² of `predicted` against `actual`.
    ///
    /// R² follows the finite convention: with zero target variance it is 1.0
    /// for a perfect fit and 0.0 otherwise.
    pub fn from_predictions(actual: &[f64], predicted: &[f64]) -> Self {
        // ---
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return TrainingMetrics::default();
        }
        let pairs = actual.iter().zip(predicted).take(n);

        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        for (a, p) in pairs {
            abs_sum += (a - p).abs();
            sq_sum += (a - p).powi(2);
        }
        let mse = sq_sum / n as f64;

        let mean = actual[..n].iter().sum::<f64>() / n as f64;
        let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - sq_sum / ss_tot
        } else if sq_sum == 0.0 {
            1.0
        } else {
            0.0
        };

        TrainingMetrics {
            mae: abs_sum / n as f64,
            mse,
            rmse: mse.sqrt(),
            r2: Some(r2),
            ..TrainingMetrics::default()
        }
    }

    /// Metrics as an opaque JSON object for forecast records.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Zero-mean, unit-variance feature scaling fitted on training rows only.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    // ---
    /// Fit per-column mean and population standard deviation.
    ///
    /// Constant columns get a scale of 1 so they pass through centred.
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        // ---
        let width = rows.first().map_or(0, Vec::len);
        let n = rows.len().max(1) as f64;

        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut scales = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in scales.iter_mut() {
            let std = (*s / n).sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        StandardScaler { means, scales }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        // ---
        row.iter()
            .zip(&self.means)
            .zip(&self.scales)
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }
}

/// Chronological train/test boundary: the last `ceil(fraction * n)` rows are
/// held out. Returns the number of training rows.
pub fn chronological_split(n: usize, holdout_fraction: f64) -> usize {
    // ---
    let n_test = (n as f64 * holdout_fraction).ceil() as usize;
    n.saturating_sub(n_test.min(n))
}

/// Direction of the forecast relative to the current AQI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

/// Advisory level for the average predicted AQI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    Acceptable,
    Caution,
    HealthAlert,
}

/// Headline numbers for a run of forecasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSummary {
    // ---
    pub current_aqi: f64,
    pub average_predicted: f64,
    pub peak_predicted: f64,
    pub change: f64,
    pub trend: Trend,
    pub advisory: Advisory,
}

impl ForecastSummary {
    // ---
    pub fn from_forecasts(current_aqi: f64, forecasts: &[Forecast]) -> Option<Self> {
        // ---
        if forecasts.is_empty() {
            return None;
        }
        let average =
            forecasts.iter().map(|f| f.predicted_aqi).sum::<f64>() / forecasts.len() as f64;
        let peak = forecasts
            .iter()
            .map(|f| f.predicted_aqi)
            .fold(f64::MIN, f64::max);
        let change = average - current_aqi;

        let trend = if change < -10.0 {
            Trend::Improving
        } else if change > 10.0 {
            Trend::Worsening
        } else {
            Trend::Stable
        };
        let advisory = if average > 150.0 {
            Advisory::HealthAlert
        } else if average > 100.0 {
            Advisory::Caution
        } else {
            Advisory::Acceptable
        };

        Some(ForecastSummary {
            current_aqi,
            average_predicted: average,
            peak_predicted: peak,
            change,
            trend,
            advisory,
        })
    }
}
