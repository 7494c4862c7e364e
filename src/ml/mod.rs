//! Training, evaluation and single-row inference orchestration
//!
//! Every call builds a fresh adapter through the factory. Nothing is cached
//! between calls, so one `MlService` can be created per request.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::load_xy;
use crate::error::{PipelineError, Result};
use crate::models::{create_model, Algorithm, MetricsReport, ModelFactory, TrainSummary};
use crate::schemas::{MLPipelineConfig, PredictionOutput, TestingConfig};
use crate::tracking::{ExperimentTracker, RunStatus};

const CV_SEED: u64 = 42;

/// Result of a training request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub status: String,
    pub experiment: String,
    pub model_type: String,
    pub result: TrainSummary,
    /// Where the artifact was actually written
    pub model_path: PathBuf,
    pub train_metrics: MetricsReport,
    pub cv_accuracy: Option<f64>,
    pub run_id: Option<String>,
}

/// ML service
#[derive(Debug, Clone)]
pub struct MlService {
    tracking_dir: PathBuf,
}

impl Default for MlService {
    fn default() -> Self {
        Self::new("./mlruns")
    }
}

impl MlService {
    pub fn new(tracking_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracking_dir: tracking_dir.into(),
        }
    }

    /// Train, persist and optionally track one model
    pub fn train_from_config(&self, config: &MLPipelineConfig) -> Result<TrainOutcome> {
        let mut config = config.clone();
        let algorithm = config.validate()?;

        info!(
            experiment = %config.experiment_name,
            model_type = algorithm.tag(),
            data = %config.data.train_csv_path.display(),
            "Training model"
        );

        let (x, y) = load_xy(
            &config.data.train_csv_path,
            &config.data.feature_columns,
            &config.data.target_column,
        )?;
        let params = config.model.params_value();
        let cv_folds = config.training.cv_folds.filter(|&k| k >= 2);
        if let Some(k) = cv_folds {
            check_folds(k, x.nrows())?;
        }

        let mut model = ModelFactory::create(algorithm);
        let result = model.train(&x, &y, &params)?;

        let model_path = algorithm.artifact_path(&config.training.save_model_path);
        if model_path != config.training.save_model_path {
            warn!(
                requested = %config.training.save_model_path.display(),
                actual = %model_path.display(),
                "Model path extension replaced with the native format"
            );
        }
        model.save(&model_path)?;

        let train_metrics = MetricsReport::compute(&y, &model.predict(&x)?)?;

        let cv_accuracy = match cv_folds {
            Some(k) => Some(cross_validate(algorithm, &x, &y, &params, k)?),
            None => None,
        };

        let run_id = if config.training.track {
            Some(self.track_training(&config, algorithm, &result, &train_metrics, cv_accuracy, &model_path)?)
        } else {
            None
        };

        info!(
            model_path = %model_path.display(),
            train_accuracy = train_metrics.accuracy,
            cv_accuracy = ?cv_accuracy,
            "Model trained"
        );

        Ok(TrainOutcome {
            status: "Model Trained".to_string(),
            experiment: config.experiment_name.clone(),
            model_type: algorithm.tag().to_string(),
            result,
            model_path,
            train_metrics,
            cv_accuracy,
            run_id,
        })
    }

    fn track_training(
        &self,
        config: &MLPipelineConfig,
        algorithm: Algorithm,
        result: &TrainSummary,
        metrics: &MetricsReport,
        cv_accuracy: Option<f64>,
        model_path: &Path,
    ) -> Result<String> {
        let tracker = ExperimentTracker::local(&self.tracking_dir);
        let mut run = tracker.start_run(&config.experiment_name, &config.run_name())?;

        run.log_param("model_type", algorithm.tag());
        run.log_param("n_samples", result.n_samples);
        run.log_param("n_features", result.n_features);
        if let serde_json::Value::Object(params) = &result.params {
            run.log_params(params.iter().map(|(k, v)| (k.clone(), v)));
        }
        run.log_metrics(metrics.as_map().into_iter().map(|(k, v)| (format!("train_{}", k), v)));
        if let Some(acc) = cv_accuracy {
            run.log_metric("cv_accuracy", acc);
        }

        if let Err(e) = tracker.log_artifact(&mut run, model_path) {
            tracker.end_run(&mut run, RunStatus::Failed)?;
            return Err(e);
        }
        tracker.end_run(&mut run, RunStatus::Finished)?;
        Ok(run.run_id)
    }

    /// Score a saved artifact against a labelled file and write the report
    pub fn test_from_config(&self, config: &TestingConfig) -> Result<MetricsReport> {
        let mut config = config.clone();
        let algorithm = config.validate()?;

        info!(
            experiment = %config.experiment_name,
            model_type = algorithm.tag(),
            model = %config.model_path.display(),
            "Testing model"
        );

        let (x, y) = load_xy(&config.test_csv_path, &config.feature_columns, &config.target_column)?;
        let mut model = ModelFactory::create(algorithm);
        model.load(&config.model_path)?;

        let report = MetricsReport::compute(&y, &model.predict(&x)?)?;

        if let Some(parent) = config.report_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&config.report_path, serde_json::to_vec_pretty(&report)?)?;

        info!(
            accuracy = report.accuracy,
            f1_score = report.f1_score,
            report = %config.report_path.display(),
            "Model tested"
        );
        Ok(report)
    }

    /// Predict one row with a saved artifact
    pub fn predict_single(&self, model_type: &str, model_path: &Path, features: &[f64]) -> Result<PredictionOutput> {
        let mut model = create_model(model_type)?;
        model.load(model_path)?;

        let x = Array2::from_shape_vec((1, features.len()), features.to_vec())?;
        let proba = model.predict_proba(&x)?;
        let p = proba
            .get(0)
            .copied()
            .ok_or_else(|| PipelineError::DataError("model returned no prediction".to_string()))?;
        Ok(PredictionOutput::from_probability(p))
    }
}

fn check_folds(k: usize, n_rows: usize) -> Result<()> {
    if k < 2 || k > n_rows {
        return Err(PipelineError::InvalidConfig(format!(
            "cv_folds={} is not valid for {} rows",
            k, n_rows
        )));
    }
    Ok(())
}

/// Mean held-out accuracy over `k` shuffled folds
pub fn cross_validate(
    algorithm: Algorithm,
    x: &Array2<f64>,
    y: &Array1<f64>,
    params: &serde_json::Value,
    k: usize,
) -> Result<f64> {
    let n = x.nrows();
    check_folds(k, n)?;

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(CV_SEED));

    let mut scores = Vec::with_capacity(k);
    for fold in 0..k {
        let mut train_idx = Vec::with_capacity(n);
        let mut test_idx = Vec::with_capacity(n / k + 1);
        for (pos, &row) in order.iter().enumerate() {
            if pos % k == fold {
                test_idx.push(row);
            } else {
                train_idx.push(row);
            }
        }

        let mut model = ModelFactory::create(algorithm);
        model.train(&x.select(Axis(0), &train_idx), &y.select(Axis(0), &train_idx), params)?;
        let pred = model.predict(&x.select(Axis(0), &test_idx))?;
        let report = MetricsReport::compute(&y.select(Axis(0), &test_idx), &pred)?;
        scores.push(report.accuracy);
    }

    Ok(scores.iter().sum::<f64>() / k as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn test_cross_validate_on_separable_data() {
        let x = array![[0.0], [0.1], [0.2], [0.3], [0.4], [1.0], [1.1], [1.2], [1.3], [1.4]];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let acc = cross_validate(
            Algorithm::RandomForest,
            &x,
            &y,
            &json!({ "n_estimators": 10, "bootstrap": false, "random_state": 0 }),
            5,
        )
        .unwrap();
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn test_cross_validate_rejects_too_many_folds() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 1.0];
        assert!(cross_validate(Algorithm::XGBoost, &x, &y, &json!({}), 3).is_err());
    }

    #[test]
    fn test_too_many_folds_fails_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("train.csv"), "x,label\n0.0,0\n1.0,1\n0.2,0\n0.9,1\n").unwrap();

        let config: MLPipelineConfig = serde_json::from_value(json!({
            "experiment_name": "folds",
            "data": {
                "train_csv_path": root.join("train.csv"),
                "target_column": "label",
                "feature_columns": ["x"]
            },
            "model": { "type": "random_forest", "params": { "n_estimators": 2 } },
            "training": { "save_model_path": root.join("model.bin"), "cv_folds": 10 }
        }))
        .unwrap();

        let err = MlService::new(root.join("mlruns")).train_from_config(&config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(!root.join("model.bin").exists());
    }
}
