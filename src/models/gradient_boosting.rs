//! Gradient-boosted trees for binary classification
//!
//! Logistic loss with second-order leaf values: each round grows a variance
//! tree on the residuals `y - p`, then replaces every leaf with
//! `G / (H + lambda)` where G and H sum the gradient and hessian of the rows
//! that reached it. Artifacts are JSON.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decision_tree::{Criterion, DecisionTree};
use super::{check_training_data, parse_params, read_json, write_json, Algorithm, ModelAdapter, TrainSummary};
use crate::error::{PipelineError, Result};

const PROBA_EPS: f64 = 1e-7;

/// Boosting hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XGBoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// L2 regularization on leaf values
    pub reg_lambda: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub random_state: Option<u64>,
    /// Initial probability; the label mean when unset
    pub base_score: Option<f64>,
}

impl Default for XGBoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_samples_leaf: 1,
            reg_lambda: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: None,
            base_score: None,
        }
    }
}

impl XGBoostParams {
    fn validate(&self) -> Result<()> {
        let bad = |reason: &str| {
            Err(PipelineError::InvalidParams {
                algorithm: Algorithm::XGBoost.to_string(),
                reason: reason.to_string(),
            })
        };
        if self.n_estimators == 0 {
            return bad("n_estimators must be at least 1");
        }
        if self.learning_rate <= 0.0 {
            return bad("learning_rate must be positive");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return bad("subsample must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return bad("colsample_bytree must be in (0, 1]");
        }
        if self.reg_lambda < 0.0 {
            return bad("reg_lambda must be non-negative");
        }
        if let Some(p) = self.base_score {
            if !(p > 0.0 && p < 1.0) {
                return bad("base_score must be in (0, 1)");
            }
        }
        Ok(())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// One boosting round: a tree over a column subset. Leaf values already
/// include the learning rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoostedTree {
    features: Vec<usize>,
    tree: DecisionTree,
}

impl BoostedTree {
    fn margin(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let view = x.select(Axis(1), &self.features);
        self.tree.predict(&view)
    }
}

/// Fitted booster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_margin: f64,
    n_features: usize,
    rounds: Vec<BoostedTree>,
}

impl GradientBoostedTrees {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &XGBoostParams) -> Result<Self> {
        params.validate()?;

        let n_samples = x.nrows();
        let n_features = x.ncols();
        let mut rng = match params.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let prior = params
            .base_score
            .unwrap_or_else(|| y.mean().unwrap_or(0.5))
            .clamp(PROBA_EPS, 1.0 - PROBA_EPS);
        let base_margin = (prior / (1.0 - prior)).ln();

        let n_rows = ((n_samples as f64 * params.subsample).ceil() as usize).clamp(1, n_samples);
        let n_cols = ((n_features as f64 * params.colsample_bytree).ceil() as usize).clamp(1, n_features);

        let mut margin = Array1::from_elem(n_samples, base_margin);
        let mut rounds = Vec::with_capacity(params.n_estimators);
        let mut row_pool: Vec<usize> = (0..n_samples).collect();
        let mut col_pool: Vec<usize> = (0..n_features).collect();

        for round in 0..params.n_estimators {
            let proba = margin.mapv(sigmoid);
            let residual = y - &proba;
            let hessian = proba.mapv(|p| (p * (1.0 - p)).max(PROBA_EPS));

            row_pool.shuffle(&mut rng);
            col_pool.shuffle(&mut rng);
            let mut rows = row_pool[..n_rows].to_vec();
            let mut features = col_pool[..n_cols].to_vec();
            rows.sort_unstable();
            features.sort_unstable();

            let x_round = x.select(Axis(0), &rows).select(Axis(1), &features);
            let r_round: Array1<f64> = rows.iter().map(|&i| residual[i]).collect();

            let mut tree = DecisionTree::new(Criterion::Mse)
                .with_max_depth(Some(params.max_depth))
                .with_min_samples_leaf(params.min_samples_leaf);
            tree.fit_with_rng(&x_round, &r_round, &mut rng)?;

            let mut sums: HashMap<usize, (f64, f64)> = HashMap::new();
            for (pos, &i) in rows.iter().enumerate() {
                let leaf = tree.leaf_index(x_round.row(pos));
                let entry = sums.entry(leaf).or_insert((0.0, 0.0));
                entry.0 += residual[i];
                entry.1 += hessian[i];
            }
            for (leaf, (g, h)) in sums {
                tree.set_leaf_value(leaf, params.learning_rate * g / (h + params.reg_lambda));
            }

            let boosted = BoostedTree { features, tree };
            margin += &boosted.margin(x)?;
            rounds.push(boosted);

            if round % 25 == 0 {
                let loss = log_loss(y, &margin);
                debug!(round, loss, "Boosting round complete");
            }
        }

        Ok(Self {
            base_margin,
            n_features,
            rounds,
        })
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let mut margin = Array1::from_elem(x.nrows(), self.base_margin);
        for round in &self.rounds {
            margin += &round.margin(x)?;
        }
        Ok(margin.mapv(sigmoid))
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Structural checks for a deserialized booster
    pub fn validate(&self) -> Result<()> {
        for round in &self.rounds {
            round.tree.validate()?;
            if round.features.len() != round.tree.n_features() {
                return Err(PipelineError::ShapeError {
                    expected: format!("{} column indices", round.tree.n_features()),
                    actual: format!("{} column indices", round.features.len()),
                });
            }
            if let Some(&col) = round.features.iter().find(|&&c| c >= self.n_features) {
                return Err(PipelineError::Serialization(format!(
                    "round reads column {} of a {}-feature model",
                    col, self.n_features
                )));
            }
        }
        Ok(())
    }
}

fn log_loss(y: &Array1<f64>, margin: &Array1<f64>) -> f64 {
    let n = y.len().max(1) as f64;
    y.iter()
        .zip(margin.iter())
        .map(|(&t, &m)| {
            let p = sigmoid(m).clamp(PROBA_EPS, 1.0 - PROBA_EPS);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / n
}

/// Boosted-tree adapter
#[derive(Debug, Default)]
pub struct XGBoostAdapter {
    model: Option<GradientBoostedTrees>,
}

impl XGBoostAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelAdapter for XGBoostAdapter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::XGBoost
    }

    fn train(&mut self, x: &Array2<f64>, y: &Array1<f64>, params: &serde_json::Value) -> Result<TrainSummary> {
        check_training_data(x, y)?;
        let params: XGBoostParams = parse_params(Algorithm::XGBoost, params)?;
        self.model = Some(GradientBoostedTrees::fit(x, y, &params)?);
        Ok(TrainSummary::new(Algorithm::XGBoost, x, serde_json::to_value(&params)?))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.model
            .as_ref()
            .ok_or(PipelineError::ModelNotFitted)?
            .predict_proba(x)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let model = self.model.as_ref().ok_or(PipelineError::ModelNotFitted)?;
        write_json(path, model)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let model: GradientBoostedTrees = read_json(path)?;
        model.validate()?;
        self.model = Some(model);
        Ok(())
    }
}
