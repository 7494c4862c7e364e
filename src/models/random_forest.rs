//! Random forest classifier and its adapter

use std::path::Path;

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decision_tree::{Criterion, DecisionTree};
use super::{check_training_data, parse_params, read_bincode, write_bincode, Algorithm, ModelAdapter, TrainSummary};
use crate::error::{PipelineError, Result};

/// Named strategies for the number of features tried per split
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeaturesStrategy {
    Sqrt,
    Log2,
    All,
}

/// `max_features` as accepted in params: a strategy name, a count, or a fraction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MaxFeatures {
    Count(usize),
    Fraction(f64),
    Strategy(MaxFeaturesStrategy),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Strategy(MaxFeaturesStrategy::Sqrt) => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Strategy(MaxFeaturesStrategy::Log2) => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Strategy(MaxFeaturesStrategy::All) => n_features,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).floor() as usize,
            MaxFeatures::Count(n) => n,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Hyperparameters accepted by the forest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
    /// Size of the rayon pool used to grow trees
    pub n_jobs: Option<usize>,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Strategy(MaxFeaturesStrategy::Sqrt),
            bootstrap: true,
            random_state: None,
            n_jobs: None,
        }
    }
}

/// Fitted forest. Only what prediction needs is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &RandomForestParams) -> Result<Self> {
        if params.n_estimators == 0 {
            return Err(PipelineError::InvalidParams {
                algorithm: Algorithm::RandomForest.to_string(),
                reason: "n_estimators must be at least 1".to_string(),
            });
        }

        let n_samples = x.nrows();
        let n_features = x.ncols();
        let max_features = params.max_features.resolve(n_features);
        let base_seed = params.random_state.unwrap_or_else(rand::random);

        let grow = || -> Result<Vec<DecisionTree>> {
            (0..params.n_estimators)
                .into_par_iter()
                .map(|tree_idx| {
                    let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                    let mut tree = DecisionTree::new(Criterion::Gini)
                        .with_max_depth(params.max_depth)
                        .with_min_samples_split(params.min_samples_split)
                        .with_min_samples_leaf(params.min_samples_leaf)
                        .with_max_features(Some(max_features));

                    if params.bootstrap {
                        let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                        let x_boot = x.select(ndarray::Axis(0), &rows);
                        let y_boot: Array1<f64> = rows.iter().map(|&i| y[i]).collect();
                        tree.fit_with_rng(&x_boot, &y_boot, &mut rng)?;
                    } else {
                        tree.fit_with_rng(x, y, &mut rng)?;
                    }
                    Ok(tree)
                })
                .collect()
        };

        let trees = match params.n_jobs {
            Some(n) if n > 0 => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| PipelineError::TrainingError(e.to_string()))?
                .install(grow)?,
            _ => grow()?,
        };

        debug!(n_trees = trees.len(), max_features, "Random forest grown");
        Ok(Self { trees, n_features })
    }

    /// Mean of the trees' leaf probabilities
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PipelineError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let per_tree: Vec<Array1<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<_>>()?;

        let mut proba = Array1::zeros(x.nrows());
        for p in &per_tree {
            proba += p;
        }
        Ok(proba / self.trees.len() as f64)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Structural checks for a deserialized forest
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(PipelineError::Serialization("forest has no trees".to_string()));
        }
        for tree in &self.trees {
            tree.validate()?;
            if tree.n_features() != self.n_features {
                return Err(PipelineError::ShapeError {
                    expected: format!("trees over {} features", self.n_features),
                    actual: format!("a tree over {} features", tree.n_features()),
                });
            }
        }
        Ok(())
    }
}

/// Tree-ensemble adapter. Artifacts are bincode.
#[derive(Debug, Default)]
pub struct RandomForestAdapter {
    model: Option<RandomForest>,
}

impl RandomForestAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn fitted(&self) -> Result<&RandomForest> {
        self.model.as_ref().ok_or(PipelineError::ModelNotFitted)
    }
}

impl ModelAdapter for RandomForestAdapter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::RandomForest
    }

    fn train(&mut self, x: &Array2<f64>, y: &Array1<f64>, params: &serde_json::Value) -> Result<TrainSummary> {
        check_training_data(x, y)?;
        let params: RandomForestParams = parse_params(Algorithm::RandomForest, params)?;
        let model = RandomForest::fit(x, y, &params)?;
        self.model = Some(model);
        Ok(TrainSummary::new(Algorithm::RandomForest, x, serde_json::to_value(&params)?))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted()?.predict_proba(x)
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_bincode(path, self.fitted()?)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let model: RandomForest = read_bincode(path)?;
        model.validate()?;
        self.model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    fn blobs() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.2],
            [0.2, 0.1],
            [0.3, 0.3],
            [1.0, 1.0],
            [1.1, 0.9],
            [0.9, 1.2],
            [1.2, 1.1],
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_forest_learns_blobs() {
        let (x, y) = blobs();
        let mut adapter = RandomForestAdapter::new();
        let summary = adapter
            .train(&x, &y, &json!({ "n_estimators": 25, "random_state": 42 }))
            .unwrap();

        assert_eq!(summary.algorithm, "RandomForest");
        assert_eq!(summary.n_samples, 8);
        let pred = adapter.predict(&x).unwrap();
        let correct = pred.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
        assert!(correct >= 7, "only {} of 8 correct", correct);
    }

    #[test]
    fn test_unknown_param_rejected() {
        let (x, y) = blobs();
        let mut adapter = RandomForestAdapter::new();
        let err = adapter.train(&x, &y, &json!({ "n_trees": 5 })).unwrap_err();
        match err {
            PipelineError::InvalidParams { reason, .. } => assert!(reason.contains("n_trees")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_max_features_forms() {
        let p: RandomForestParams = serde_json::from_value(json!({ "max_features": "log2" })).unwrap();
        assert_eq!(p.max_features.resolve(8), 3);
        let p: RandomForestParams = serde_json::from_value(json!({ "max_features": 0.5 })).unwrap();
        assert_eq!(p.max_features.resolve(8), 4);
        let p: RandomForestParams = serde_json::from_value(json!({ "max_features": 2 })).unwrap();
        assert_eq!(p.max_features.resolve(8), 2);
    }

    #[test]
    fn test_seeded_forest_is_deterministic() {
        let (x, y) = blobs();
        let params = RandomForestParams {
            n_estimators: 10,
            random_state: Some(3),
            ..Default::default()
        };
        let a = RandomForest::fit(&x, &y, &params).unwrap().predict_proba(&x).unwrap();
        let b = RandomForest::fit(&x, &y, &params).unwrap().predict_proba(&x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sqrt_max_features_rounds_down() {
        assert_eq!(MaxFeatures::Strategy(MaxFeaturesStrategy::Sqrt).resolve(8), 2);
        assert_eq!(MaxFeatures::Strategy(MaxFeaturesStrategy::Sqrt).resolve(9), 3);
        assert_eq!(MaxFeatures::Strategy(MaxFeaturesStrategy::Sqrt).resolve(1), 1);
        assert_eq!(MaxFeatures::Fraction(0.1).resolve(5), 1);
    }

    #[test]
    fn test_load_rejects_feature_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.bin");
        let (x, y) = blobs();
        let params = RandomForestParams {
            n_estimators: 3,
            random_state: Some(1),
            ..Default::default()
        };
        let mut forest = RandomForest::fit(&x, &y, &params).unwrap();
        forest.n_features = 5;
        write_bincode(&path, &forest).unwrap();

        let mut adapter = RandomForestAdapter::new();
        assert!(matches!(adapter.load(&path), Err(PipelineError::ShapeError { .. })));

        let empty = RandomForest { trees: Vec::new(), n_features: 2 };
        write_bincode(&path, &empty).unwrap();
        assert!(adapter.load(&path).is_err());
    }
}
