//! Pipeline configuration schemas
//!
//! Every request is parsed into one of these structures and validated once
//! before any service runs. After `validate` succeeds the config is treated as
//! immutable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::models::Algorithm;

fn default_test_size() -> f64 {
    0.2
}

fn default_random_state() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Drop the target from a feature list. Returns true if it was present.
pub(crate) fn strip_target(features: &mut Vec<String>, target: &str) -> bool {
    let before = features.len();
    features.retain(|name| name != target);
    let removed = features.len() != before;
    if removed {
        warn!(target_column = %target, "Target column listed as a feature, removing it from features");
    }
    removed
}

/// Configuration for splitting a raw dataset into train/test files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProcessingConfig {
    /// Path of the raw tabular file
    pub raw_data_path: PathBuf,
    /// Column holding the label
    pub target_column: String,
    /// Columns used as model inputs
    pub feature_columns: Vec<String>,
    /// Fraction of rows assigned to the test split
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    /// Seed for the shuffle
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    /// Shuffle rows before splitting
    #[serde(default = "default_true")]
    pub shuffle: bool,
    /// Where the train split is written
    pub output_train_path: PathBuf,
    /// Where the test split is written
    pub output_test_path: PathBuf,
}

impl DataProcessingConfig {
    /// Build a config whose features are every header column except the target.
    pub fn derive_from_header(
        raw_data_path: PathBuf,
        header: &[String],
        target_column: &str,
        output_dir: &Path,
        stem: &str,
    ) -> Self {
        let feature_columns = header
            .iter()
            .filter(|name| name.as_str() != target_column)
            .cloned()
            .collect();

        Self {
            raw_data_path,
            target_column: target_column.to_string(),
            feature_columns,
            test_size: default_test_size(),
            random_state: default_random_state(),
            shuffle: true,
            output_train_path: output_dir.join(format!("{}_train.csv", stem)),
            output_test_path: output_dir.join(format!("{}_test.csv", stem)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_column.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("target_column must not be empty".to_string()));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "test_size must be between 0 and 1, got {}",
                self.test_size
            )));
        }
        if self.output_train_path == self.output_test_path {
            return Err(PipelineError::InvalidConfig(
                "output_train_path and output_test_path must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Data section of a training pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub train_csv_path: PathBuf,
    #[serde(default)]
    pub test_csv_path: Option<PathBuf>,
    pub target_column: String,
    pub feature_columns: Vec<String>,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
}

/// Algorithm selection plus free-form hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Algorithm tag, resolved by the model factory
    #[serde(rename = "type")]
    pub model_type: String,
    /// Passed verbatim to the algorithm
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ModelConfig {
    pub fn algorithm(&self) -> Result<Algorithm> {
        self.model_type.parse()
    }

    pub fn params_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.params.clone().into_iter().collect())
    }
}

/// Training section of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Requested artifact location; the extension is normalized per algorithm
    pub save_model_path: PathBuf,
    /// Run k-fold cross-validation when set to 2 or more
    #[serde(default)]
    pub cv_folds: Option<usize>,
    /// Log the run to the experiment tracker
    #[serde(default)]
    pub track: bool,
    /// Run name in the tracker, defaults to the experiment name
    #[serde(default)]
    pub run_name: Option<String>,
}

/// Full training pipeline request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPipelineConfig {
    pub experiment_name: String,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl MLPipelineConfig {
    /// Normalize the config and resolve the algorithm tag.
    pub fn validate(&mut self) -> Result<Algorithm> {
        if self.experiment_name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("experiment_name must not be empty".to_string()));
        }
        strip_target(&mut self.data.feature_columns, &self.data.target_column);
        if self.data.feature_columns.is_empty() {
            return Err(PipelineError::InvalidConfig("feature_columns must not be empty".to_string()));
        }
        if let Some(k) = self.training.cv_folds {
            if k == 1 {
                return Err(PipelineError::InvalidConfig("cv_folds must be at least 2".to_string()));
            }
        }
        self.model.algorithm()
    }

    pub fn run_name(&self) -> String {
        self.training
            .run_name
            .clone()
            .unwrap_or_else(|| self.experiment_name.clone())
    }
}

/// Evaluation request for a previously trained artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestingConfig {
    pub experiment_name: String,
    pub test_csv_path: PathBuf,
    pub model_path: PathBuf,
    pub model_type: String,
    pub target_column: String,
    pub feature_columns: Vec<String>,
    pub report_path: PathBuf,
}

impl TestingConfig {
    pub fn validate(&mut self) -> Result<Algorithm> {
        strip_target(&mut self.feature_columns, &self.target_column);
        if self.feature_columns.is_empty() {
            return Err(PipelineError::InvalidConfig("feature_columns must not be empty".to_string()));
        }
        self.model_type.parse()
    }
}
