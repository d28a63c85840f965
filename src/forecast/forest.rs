//! Tree-ensemble AQI forecaster.
//!
//! Bagged CART regression trees over the engineered feature table. Training
//! splits the table chronologically, fits a [`StandardScaler`] on the
//! training rows only and grows the trees in parallel. Each tree draws its
//! bootstrap sample from its own seeded RNG, so results do not depend on how
//! rayon schedules the work.

use chrono::Duration;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use super::tree::{RegressionTree, TreeParams};
use super::{chronological_split, ModelInfo, StandardScaler, TrainingMetrics};
use crate::error::{CoreError, CoreResult};
use crate::features::FeatureTable;
use crate::models::Forecast;

// ---

/// Fixed half-width of the prediction interval, in AQI points.
pub const INTERVAL_HALF_WIDTH: f64 = 25.0;

/// The forest forecasts the next day.
pub const FORECAST_HORIZON_HOURS: usize = 24;

/// Ensemble hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    // ---
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub seed: u64,
    pub holdout_fraction: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
            seed: 42,
            holdout_fraction: 0.2,
        }
    }
}

/// Bagged regression trees; the prediction is the mean over trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    // ---
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Self {
        // ---
        let n = x.len();
        let n_features = x.first().map_or(0, Vec::len);

        let trees = (0..params.n_estimators.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, &samples, params.tree)
            })
            .collect();

        RandomForest { trees, n_features }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        // ---
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        sum / self.trees.len() as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean of per-tree normalised importances, renormalised to sum to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        // ---
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (acc, v) in totals.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|v| *v /= sum);
        }
        totals
    }
}

/// Trains [`TrainedForest`] values from feature tables.
#[derive(Debug, Clone, Default)]
pub struct TreeEnsembleForecaster {
    params: ForestParams,
}

impl TreeEnsembleForecaster {
    // ---
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Train on `table` to predict `target`, evaluating on the chronological
    /// holdout.
    pub fn train(
        &self,
        table: &FeatureTable,
        target: &str,
    ) -> CoreResult<(TrainedForest, TrainingMetrics)> {
        // ---
        let target_idx = table
            .column_index(target)
            .ok_or_else(|| CoreError::UnknownTarget {
                column: target.to_string(),
            })?;

        let feature_columns: Vec<String> = table
            .columns
            .iter()
            .filter(|c| c.as_str() != target)
            .cloned()
            .collect();

        let mut x = Vec::with_capacity(table.len());
        let mut y = Vec::with_capacity(table.len());
        for row in &table.rows {
            let label = row.values[target_idx];
            if !label.is_finite() {
                continue;
            }
            x.push(feature_vector(&row.values, target_idx));
            y.push(label);
        }

        let n = x.len();
        let n_train = chronological_split(n, self.params.holdout_fraction);
        let n_test = n - n_train;
        if n_train < 2 || n_test < 1 {
            return Err(CoreError::InsufficientData {
                context: "tree ensemble training",
                required: 3,
                available: n,
            });
        }

        let scaler = StandardScaler::fit(&x[..n_train]);
        let x_train = scaler.transform(&x[..n_train]);
        let x_test = scaler.transform(&x[n_train..]);

        debug!(
            "Fitting {} trees on {} rows x {} features (target {target})",
            self.params.n_estimators,
            n_train,
            feature_columns.len()
        );
        let forest = RandomForest::fit(&x_train, &y[..n_train], &self.params);

        let predicted: Vec<f64> = x_test.iter().map(|r| forest.predict(r)).collect();
        let mut metrics = TrainingMetrics::from_predictions(&y[n_train..], &predicted);
        metrics.n_train = n_train;
        metrics.n_test = n_test;

        let mut importances: Vec<(String, f64)> = feature_columns
            .iter()
            .cloned()
            .zip(forest.feature_importances())
            .collect();
        importances.sort_by(|a, b| b.1.total_cmp(&a.1));

        info!(
            "Tree ensemble trained: MAE {:.2}, RMSE {:.2}, R² {:.3}",
            metrics.mae,
            metrics.rmse,
            metrics.r2.unwrap_or(0.0)
        );

        let trained = TrainedForest {
            target: target.to_string(),
            params: self.params,
            feature_columns,
            scaler,
            forest,
            importances,
        };
        Ok((trained, metrics))
    }
}

/// A fitted ensemble together with the schema it was trained on.
#[derive(Debug, Clone)]
pub struct TrainedForest {
    target: String,
    params: ForestParams,
    feature_columns: Vec<String>,
    scaler: StandardScaler,
    forest: RandomForest,
    importances: Vec<(String, f64)>,
}

/// Point forecast plus the features that drove the model.
#[derive(Debug, Clone, Serialize)]
pub struct TreePrediction {
    pub forecast: Forecast,
    /// Sorted by importance, highest first.
    pub feature_importances: Vec<(String, f64)>,
}

impl TrainedForest {
    // ---
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn feature_importances(&self) -> &[(String, f64)] {
        &self.importances
    }

    pub fn info(&self) -> ModelInfo {
        // ---
        ModelInfo::TreeEnsemble {
            target: self.target.clone(),
            n_estimators: self.forest.n_trees(),
            max_depth: self.params.tree.max_depth,
            min_samples_split: self.params.tree.min_samples_split,
            min_samples_leaf: self.params.tree.min_samples_leaf,
            n_features: self.feature_columns.len(),
            seed: self.params.seed,
        }
    }

    /// Predict from one row of `table`, looking columns up by name.
    pub fn predict(&self, table: &FeatureTable, row: usize) -> CoreResult<TreePrediction> {
        // ---
        let indices = self
            .feature_columns
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| CoreError::SchemaMismatch {
                        column: name.clone(),
                    })
            })
            .collect::<CoreResult<Vec<usize>>>()?;

        let feature_row = table.rows.get(row).ok_or(CoreError::InsufficientData {
            context: "tree ensemble prediction",
            required: row + 1,
            available: table.len(),
        })?;

        let raw: Vec<f64> = indices
            .iter()
            .map(|&i| zero_fill(feature_row.values[i]))
            .collect();
        let scaled = self.scaler.transform_row(&raw);
        let p = self.forest.predict(&scaled).max(0.0);

        let forecast = Forecast {
            horizon_step: FORECAST_HORIZON_HOURS,
            target_timestamp: Some(
                feature_row.timestamp + Duration::hours(FORECAST_HORIZON_HOURS as i64),
            ),
            predicted_aqi: p,
            lower_bound: (p - INTERVAL_HALF_WIDTH).max(0.0),
            upper_bound: p + INTERVAL_HALF_WIDTH,
        };

        Ok(TreePrediction {
            forecast,
            feature_importances: self.importances.clone(),
        })
    }

    /// Predict from the most recent row of `table`.
    pub fn predict_latest(&self, table: &FeatureTable) -> CoreResult<TreePrediction> {
        // ---
        if table.is_empty() {
            return Err(CoreError::InsufficientData {
                context: "tree ensemble prediction",
                required: 1,
                available: 0,
            });
        }
        self.predict(table, table.len() - 1)
    }
}

fn feature_vector(values: &[f64], target_idx: usize) -> Vec<f64> {
    // ---
    values
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != target_idx)
        .map(|(_, v)| zero_fill(*v))
        .collect()
}

/// Missing raw pollutants enter the model as zero.
fn zero_fill(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
