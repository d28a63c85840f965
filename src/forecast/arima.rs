//! ARIMA(2,1,2) forecaster on an hourly AQI grid.
//!
//! The series is resampled hourly, differenced once, and the ARMA(2,2) part
//! is estimated with the Hannan–Rissanen procedure:
//!
//! 1. a long autoregression on the differences yields innovation estimates;
//! 2. OLS of each difference on its two lags and two lagged innovations gives
//!    the AR and MA coefficients.
//!
//! Coefficients are shrunk into the stationary / invertible region when the
//! regression lands outside it. Residuals are then recomputed by conditional
//! sum of squares, and the Gaussian likelihood, AIC and BIC follow from the
//! residual variance. Least squares uses the SVD solver from nalgebra.

use chrono::{DateTime, Duration, Utc};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::{debug, info};

use super::{ModelInfo, TrainingMetrics};
use crate::error::{CoreError, CoreResult};
use crate::models::{Forecast, MeasurementSeries, MEASUREMENT_COLUMNS};

// ---

pub const AR_ORDER: usize = 2;
pub const DIFFERENCE_ORDER: usize = 1;
pub const MA_ORDER: usize = 2;

/// Hourly points required before fitting is attempted.
pub const MIN_OBSERVATIONS: usize = 48;

/// Interval half-width used when the analytic band is not finite.
pub const FALLBACK_HALF_WIDTH: f64 = 20.0;

const Z_95: f64 = 1.96;

/// Trains [`TrainedArima`] values from measurement series.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArimaForecaster;

/// Fitted coefficients plus the history tail needed to forecast.
#[derive(Debug, Clone)]
pub struct TrainedArima {
    // ---
    target: String,
    ar: [f64; AR_ORDER],
    ma: [f64; MA_ORDER],
    sigma2: f64,
    aic: f64,
    bic: f64,
    log_likelihood: f64,
    n_obs: usize,
    last_level: f64,
    last_timestamp: DateTime<Utc>,
    /// Differenced series, oldest first.
    diffs: Vec<f64>,
    /// CSS innovations aligned with `diffs`.
    residuals: Vec<f64>,
}

/// Hourly forecasts with the fit diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ArimaForecast {
    // ---
    pub forecasts: Vec<Forecast>,
    /// Mean predicted AQI over the horizon, clamped at zero.
    pub next_day_average: f64,
    pub aic: f64,
    pub bic: f64,
    pub log_likelihood: f64,
}

impl ArimaForecaster {
    // ---
    pub fn new() -> Self {
        ArimaForecaster
    }

    /// Fit on the hourly-resampled `target` column of `series`.
    pub fn train(
        &self,
        series: &MeasurementSeries,
        target: &str,
    ) -> CoreResult<(TrainedArima, TrainingMetrics)> {
        // ---
        if !MEASUREMENT_COLUMNS.contains(&target) {
            return Err(CoreError::UnknownTarget {
                column: target.to_string(),
            });
        }

        let grid = series.resample_hourly(target);
        if grid.len() < MIN_OBSERVATIONS {
            return Err(CoreError::InsufficientData {
                context: "arima",
                required: MIN_OBSERVATIONS,
                available: grid.len(),
            });
        }

        let levels: Vec<f64> = grid.iter().map(|(_, v)| *v).collect();
        let diffs: Vec<f64> = levels.windows(2).map(|w| w[1] - w[0]).collect();

        let innovations = long_ar_innovations(&diffs)?;
        let (ar, ma) = arma_regression(&diffs, &innovations)?;
        let ar = shrink_into(ar, is_stationary);
        let ma = shrink_into(ma, is_invertible);

        let residuals = css_residuals(&diffs, &ar, &ma);

        // Conditional on the first AR_ORDER differences
        let scored = &residuals[AR_ORDER..];
        let n = scored.len();
        let ssr: f64 = scored.iter().map(|a| a * a).sum();
        let sigma2 = (ssr / n as f64).max(f64::EPSILON);
        let log_likelihood = -(n as f64) / 2.0 * ((2.0 * std::f64::consts::PI * sigma2).ln() + 1.0);
        let k = (AR_ORDER + MA_ORDER + 1) as f64;
        let aic = -2.0 * log_likelihood + 2.0 * k;
        let bic = -2.0 * log_likelihood + k * (n as f64).ln();

        if !(log_likelihood.is_finite() && ar.iter().chain(&ma).all(|c| c.is_finite())) {
            return Err(CoreError::ModelFit(
                "non-finite coefficients or likelihood".to_string(),
            ));
        }

        // In-sample one-step fit on levels
        let actual: Vec<f64> = (AR_ORDER..diffs.len()).map(|t| levels[t + 1]).collect();
        let fitted: Vec<f64> = (AR_ORDER..diffs.len())
            .map(|t| levels[t] + diffs[t] - residuals[t])
            .collect();
        let mut metrics = TrainingMetrics::from_predictions(&actual, &fitted);
        metrics.r2 = None;
        metrics.aic = Some(aic);
        metrics.bic = Some(bic);
        metrics.log_likelihood = Some(log_likelihood);
        metrics.n_train = grid.len();

        info!(
            "ARIMA(2,1,2) fitted on {} hourly points for {}: AIC {:.1}, BIC {:.1}",
            grid.len(),
            series.city(),
            aic,
            bic
        );
        debug!("AR {:?}, MA {:?}, sigma2 {:.3}", ar, ma, sigma2);

        let (last_timestamp, last_level) = grid[grid.len() - 1];
        let trained = TrainedArima {
            target: target.to_string(),
            ar,
            ma,
            sigma2,
            aic,
            bic,
            log_likelihood,
            n_obs: grid.len(),
            last_level,
            last_timestamp,
            diffs,
            residuals,
        };
        Ok((trained, metrics))
    }
}

impl TrainedArima {
    // ---
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn ar_coefficients(&self) -> [f64; AR_ORDER] {
        self.ar
    }

    pub fn ma_coefficients(&self) -> [f64; MA_ORDER] {
        self.ma
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn info(&self) -> ModelInfo {
        // ---
        ModelInfo::Arima {
            target: self.target.clone(),
            order: (AR_ORDER, DIFFERENCE_ORDER, MA_ORDER),
            ar: self.ar,
            ma: self.ma,
            sigma2: self.sigma2,
            n_obs: self.n_obs,
        }
    }

    /// Forecast `steps` hours past the last grid point.
    pub fn forecast(&self, steps: usize) -> ArimaForecast {
        // ---
        let mut diffs = self.diffs.clone();
        let mut residuals = self.residuals.clone();
        let psi = self.psi_weights(steps);

        let mut level = self.last_level;
        let mut cumulative_psi2 = 0.0;
        let mut forecasts = Vec::with_capacity(steps);
        let mut raw_sum = 0.0;

        for h in 1..=steps {
            let t = diffs.len();
            let next = one_step(&diffs, &residuals, t, &self.ar, &self.ma);
            diffs.push(next);
            residuals.push(0.0);
            level += next;
            raw_sum += level;

            cumulative_psi2 += psi[h - 1] * psi[h - 1];
            let mut half = Z_95 * (self.sigma2 * cumulative_psi2).sqrt();
            if !half.is_finite() {
                half = FALLBACK_HALF_WIDTH;
            }

            forecasts.push(Forecast {
                horizon_step: h,
                target_timestamp: Some(self.last_timestamp + Duration::hours(h as i64)),
                predicted_aqi: level.max(0.0),
                lower_bound: (level - half).max(0.0),
                upper_bound: level + half,
            });
        }

        let next_day_average = if steps == 0 {
            0.0
        } else {
            (raw_sum / steps as f64).max(0.0)
        };

        ArimaForecast {
            forecasts,
            next_day_average,
            aic: self.aic,
            bic: self.bic,
            log_likelihood: self.log_likelihood,
        }
    }

    /// ψ-weights of the integrated model, ψ₀ = 1.
    fn psi_weights(&self, count: usize) -> Vec<f64> {
        // ---
        // (1 - φ1 B - φ2 B²)(1 - B) expanded
        let alpha = [
            1.0 + self.ar[0],
            self.ar[1] - self.ar[0],
            -self.ar[1],
        ];
        let mut psi = Vec::with_capacity(count);
        for j in 0..count {
            let mut value = if j == 0 {
                1.0
            } else if j <= MA_ORDER {
                self.ma[j - 1]
            } else {
                0.0
            };
            for (i, a) in alpha.iter().enumerate() {
                if let Some(prev) = j.checked_sub(i + 1) {
                    value += a * psi[prev];
                }
            }
            psi.push(value);
        }
        psi
    }
}

/// ARMA prediction for index `t` from lags strictly before it.
fn one_step(diffs: &[f64], residuals: &[f64], t: usize, ar: &[f64], ma: &[f64]) -> f64 {
    // ---
    let lag = |xs: &[f64], k: usize| t.checked_sub(k).map_or(0.0, |i| xs[i]);
    let ar_part: f64 = ar.iter().enumerate().map(|(i, c)| c * lag(diffs, i + 1)).sum();
    let ma_part: f64 = ma
        .iter()
        .enumerate()
        .map(|(i, c)| c * lag(residuals, i + 1))
        .sum();
    ar_part + ma_part
}

fn css_residuals(diffs: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    // ---
    let mut residuals = Vec::with_capacity(diffs.len());
    for t in 0..diffs.len() {
        let a = if t < AR_ORDER {
            0.0
        } else {
            diffs[t] - one_step(diffs, &residuals, t, ar, ma)
        };
        residuals.push(a);
    }
    residuals
}

/// Order of the preliminary autoregression.
fn long_ar_order(n: usize) -> usize {
    // ---
    let by_log = (10.0 * (n as f64).log10()).ceil() as usize;
    by_log.min(n / 4).max(AR_ORDER + MA_ORDER)
}

/// Innovations from a long AR fit; zero before the AR order.
fn long_ar_innovations(diffs: &[f64]) -> CoreResult<Vec<f64>> {
    // ---
    let m = long_ar_order(diffs.len());
    let rows: Vec<Vec<f64>> = (m..diffs.len())
        .map(|t| (1..=m).map(|k| diffs[t - k]).collect())
        .collect();
    let targets: Vec<f64> = diffs[m..].to_vec();
    let coef = least_squares(&rows, &targets)?;

    let mut innovations = vec![0.0; diffs.len()];
    for (t, row) in (m..diffs.len()).zip(&rows) {
        let fitted: f64 = row.iter().zip(&coef).map(|(x, c)| x * c).sum();
        innovations[t] = diffs[t] - fitted;
    }
    Ok(innovations)
}

fn arma_regression(
    diffs: &[f64],
    innovations: &[f64],
) -> CoreResult<([f64; AR_ORDER], [f64; MA_ORDER])> {
    // ---
    let start = long_ar_order(diffs.len()) + MA_ORDER;
    let rows: Vec<Vec<f64>> = (start..diffs.len())
        .map(|t| {
            vec![
                diffs[t - 1],
                diffs[t - 2],
                innovations[t - 1],
                innovations[t - 2],
            ]
        })
        .collect();
    let targets: Vec<f64> = diffs[start.min(diffs.len())..].to_vec();
    let coef = least_squares(&rows, &targets)?;
    Ok(([coef[0], coef[1]], [coef[2], coef[3]]))
}

fn least_squares(rows: &[Vec<f64>], targets: &[f64]) -> CoreResult<Vec<f64>> {
    // ---
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.len() < ncols || ncols == 0 {
        return Err(CoreError::ModelFit(format!(
            "{} equations for {} unknowns",
            rows.len(),
            ncols
        )));
    }
    let x = DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]);
    let y = DVector::from_column_slice(targets);
    let beta = x
        .svd(true, true)
        .solve(&y, 1e-10)
        .map_err(|e| CoreError::ModelFit(e.to_string()))?;
    Ok(beta.iter().copied().collect())
}

/// AR(2) stationarity triangle, with a small margin.
fn is_stationary(c: [f64; 2]) -> bool {
    let bound = 0.99;
    c[1].abs() < bound && c[0] + c[1] < bound && c[1] - c[0] < bound
}

/// MA(2) invertibility triangle for `1 + θ1 B + θ2 B²`, with a small margin.
fn is_invertible(c: [f64; 2]) -> bool {
    let bound = 0.99;
    c[1].abs() < bound && -(c[0] + c[1]) < bound && c[0] - c[1] < bound
}

/// Scale coefficients toward zero until `ok` holds.
fn shrink_into(mut c: [f64; 2], ok: fn([f64; 2]) -> bool) -> [f64; 2] {
    // ---
    if !c.iter().all(|v| v.is_finite()) {
        return [0.0; 2];
    }
    for _ in 0..200 {
        if ok(c) {
            return c;
        }
        c = [c[0] * 0.9, c[1] * 0.9];
    }
    [0.0; 2]
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{Concentrations, Measurement};
    use chrono::TimeZone;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    fn series_with(hours: &[usize], aqi: impl Fn(usize) -> f64) -> MeasurementSeries {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let rows = hours
            .iter()
            .map(|&i| Measurement {
                timestamp: start + Duration::hours(i as i64),
                city: "Mumbai".to_string(),
                location: "Mumbai Central".to_string(),
                latitude: None,
                longitude: None,
                pollutants: Concentrations::default(),
                aqi: aqi(i),
            })
            .collect();
        MeasurementSeries::new("Mumbai", rows).unwrap()
    }

    fn noisy_diurnal(n: usize) -> MeasurementSeries {
        // ---
        let mut rng = StdRng::seed_from_u64(7);
        let noise: Vec<f64> = (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect();
        let hours: Vec<usize> = (0..n).collect();
        series_with(&hours, |i| {
            120.0 + 30.0 * (2.0 * PI * i as f64 / 24.0).sin() + noise[i]
        })
    }

    #[test]
    fn too_short_fails_before_fitting() {
        // ---
        let hours: Vec<usize> = (0..47).collect();
        let err = ArimaForecaster::new()
            .train(&series_with(&hours, |_| 100.0), "aqi")
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientData {
                required: 48,
                available: 47,
                ..
            }
        ));
    }

    #[test]
    fn gaps_are_filled_onto_the_grid() {
        // ---
        // 40 observations spread over 60 hours reach the minimum once resampled
        let hours: Vec<usize> = (0..60).filter(|h| h % 3 != 1).collect();
        assert!(hours.len() < MIN_OBSERVATIONS);
        let (model, _) = ArimaForecaster::new()
            .train(&series_with(&hours, |i| 100.0 + (i % 5) as f64), "aqi")
            .unwrap();
        assert_eq!(model.n_obs(), 60);
    }

    #[test]
    fn fit_reports_finite_diagnostics() {
        // ---
        let (model, metrics) = ArimaForecaster::new()
            .train(&noisy_diurnal(24 * 10), "aqi")
            .unwrap();
        assert!(metrics.aic.unwrap().is_finite());
        assert!(metrics.bic.unwrap() > metrics.aic.unwrap());
        assert!(metrics.log_likelihood.unwrap().is_finite());
        assert!(metrics.mae.is_finite() && metrics.mae < 30.0);
        assert!(is_stationary(model.ar_coefficients()));
        assert!(is_invertible(model.ma_coefficients()));
        assert!(model.sigma2() > 0.0);
    }

    #[test]
    fn forecast_shapes_and_bounds() {
        // ---
        let series = noisy_diurnal(24 * 10);
        let last = series.latest().unwrap().timestamp;
        let (model, _) = ArimaForecaster::new().train(&series, "aqi").unwrap();
        let out = model.forecast(24);

        assert_eq!(out.forecasts.len(), 24);
        assert_eq!(out.forecasts[0].target_timestamp, Some(last + Duration::hours(1)));
        assert_eq!(out.forecasts[23].horizon_step, 24);
        assert!(out.next_day_average >= 0.0);

        let mut previous_width = 0.0;
        for f in &out.forecasts {
            assert!(f.predicted_aqi >= 0.0);
            assert!(f.lower_bound >= 0.0);
            assert!(f.lower_bound <= f.predicted_aqi && f.predicted_aqi <= f.upper_bound);
            let width = f.upper_bound - f.predicted_aqi;
            assert!(width + 1e-9 >= previous_width, "band narrowed");
            previous_width = width;
        }
    }

    #[test]
    fn non_finite_variance_falls_back_to_fixed_band() {
        // ---
        let (mut model, _) = ArimaForecaster::new()
            .train(&noisy_diurnal(24 * 5), "aqi")
            .unwrap();
        let finite = model.forecast(6);

        for sigma2 in [f64::NAN, f64::INFINITY] {
            model.sigma2 = sigma2;
            let out = model.forecast(6);
            for (f, reference) in out.forecasts.iter().zip(&finite.forecasts) {
                assert_eq!(f.predicted_aqi, reference.predicted_aqi);
                assert!(f.predicted_aqi > FALLBACK_HALF_WIDTH);
                assert!((f.upper_bound - f.predicted_aqi - FALLBACK_HALF_WIDTH).abs() < 1e-9);
                assert!((f.predicted_aqi - f.lower_bound - FALLBACK_HALF_WIDTH).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn info_reports_order_and_coefficients() {
        // ---
        let (model, _) = ArimaForecaster::new()
            .train(&noisy_diurnal(24 * 5), "aqi")
            .unwrap();
        let ModelInfo::Arima {
            order, ar, ma, n_obs, ..
        } = model.info()
        else {
            panic!("expected ARIMA info");
        };
        assert_eq!(order, (2, 1, 2));
        assert_eq!(ar, model.ar_coefficients());
        assert_eq!(ma, model.ma_coefficients());
        assert_eq!(n_obs, 24 * 5);
    }

    #[test]
    fn zero_steps_is_empty() {
        // ---
        let (model, _) = ArimaForecaster::new()
            .train(&noisy_diurnal(72), "aqi")
            .unwrap();
        let out = model.forecast(0);
        assert!(out.forecasts.is_empty());
        assert_eq!(out.next_day_average, 0.0);
    }

    #[test]
    fn rejects_unknown_target() {
        // ---
        let err = ArimaForecaster::new()
            .train(&noisy_diurnal(72), "humidity")
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownTarget { .. }));
    }

    #[test]
    fn shrink_reaches_the_region() {
        // ---
        let c = shrink_into([1.5, 0.8], is_stationary);
        assert!(is_stationary(c));
        let c = shrink_into([-2.0, 1.2], is_invertible);
        assert!(is_invertible(c));
        assert_eq!(shrink_into([f64::NAN, 0.1], is_stationary), [0.0, 0.0]);
        // One 0.9 step brings a unit root inside the 0.99 margin
        assert_eq!(shrink_into([1.0, 0.0], is_stationary), [0.9, 0.0]);
    }
}
