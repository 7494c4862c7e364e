//! Model adapters and the factory that selects them
//!
//! Every algorithm sits behind [`ModelAdapter`], a uniform
//! train / predict / save / load contract. [`Algorithm`] is the closed set of
//! supported variants, parsed once from the request tag; [`create_model`]
//! maps a tag to a fresh adapter.

pub mod decision_tree;
pub mod gradient_boosting;
pub mod metrics;
pub mod neural_network;
pub mod random_forest;

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub use decision_tree::{Criterion, DecisionTree};
pub use gradient_boosting::{XGBoostAdapter, XGBoostParams};
pub use metrics::{ConfusionCounts, MetricsReport};
pub use neural_network::{NeuralNetworkAdapter, NeuralNetworkParams};
pub use random_forest::{MaxFeatures, RandomForestAdapter, RandomForestParams};

/// Supported learning algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "random_forest")]
    RandomForest,
    #[serde(rename = "xgboost", alias = "gradient_boosting")]
    XGBoost,
    #[serde(rename = "neural_network")]
    NeuralNetwork,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::RandomForest, Algorithm::XGBoost, Algorithm::NeuralNetwork];

    /// Tag accepted in configs
    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::RandomForest => "random_forest",
            Algorithm::XGBoost => "xgboost",
            Algorithm::NeuralNetwork => "neural_network",
        }
    }

    /// Extension of the native artifact format
    pub fn extension(&self) -> &'static str {
        match self {
            Algorithm::RandomForest => "bin",
            Algorithm::XGBoost => "json",
            Algorithm::NeuralNetwork => "weights",
        }
    }

    /// Where an artifact actually lands for a requested path
    pub fn artifact_path(&self, requested: &Path) -> PathBuf {
        requested.with_extension(self.extension())
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::RandomForest => "RandomForest",
            Algorithm::XGBoost => "XGBoost",
            Algorithm::NeuralNetwork => "NeuralNetwork",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Algorithm {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random_forest" => Ok(Algorithm::RandomForest),
            "xgboost" | "gradient_boosting" => Ok(Algorithm::XGBoost),
            "neural_network" => Ok(Algorithm::NeuralNetwork),
            _ => Err(PipelineError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Metadata returned by a successful `train`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSummary {
    pub status: String,
    pub algorithm: String,
    pub n_samples: usize,
    pub n_features: usize,
    /// Hyperparameters after defaults were applied
    pub params: serde_json::Value,
}

impl TrainSummary {
    pub(crate) fn new(algorithm: Algorithm, x: &Array2<f64>, params: serde_json::Value) -> Self {
        Self {
            status: "trained".to_string(),
            algorithm: algorithm.to_string(),
            n_samples: x.nrows(),
            n_features: x.ncols(),
            params,
        }
    }
}

/// Uniform contract over the learning algorithms
pub trait ModelAdapter: Send {
    fn algorithm(&self) -> Algorithm;

    /// Fit on `x`/`y`; `params` is handed to the algorithm's own parser
    fn train(&mut self, x: &Array2<f64>, y: &Array1<f64>, params: &serde_json::Value) -> Result<TrainSummary>;

    /// Positive-class probability per row
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Binary labels, 1.0 where the probability reaches 0.5
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    fn save(&self, path: &Path) -> Result<()>;

    fn load(&mut self, path: &Path) -> Result<()>;
}

/// Builds adapters. Holds no state.
pub struct ModelFactory;

impl ModelFactory {
    pub fn create(algorithm: Algorithm) -> Box<dyn ModelAdapter> {
        match algorithm {
            Algorithm::RandomForest => Box::new(RandomForestAdapter::new()),
            Algorithm::XGBoost => Box::new(XGBoostAdapter::new()),
            Algorithm::NeuralNetwork => Box::new(NeuralNetworkAdapter::new()),
        }
    }
}

/// Fresh adapter for an algorithm tag
pub fn create_model(tag: &str) -> Result<Box<dyn ModelAdapter>> {
    Ok(ModelFactory::create(tag.parse()?))
}

/// Parse free-form params into an algorithm's config. `null` means defaults.
pub(crate) fn parse_params<T: DeserializeOwned>(algorithm: Algorithm, params: &serde_json::Value) -> Result<T> {
    let value = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| PipelineError::InvalidParams {
        algorithm: algorithm.to_string(),
        reason: e.to_string(),
    })
}

/// Shared preconditions: non-empty, aligned, 0/1 labels
pub(crate) fn check_training_data(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(PipelineError::TrainingError("training data is empty".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(PipelineError::ShapeError {
            expected: format!("{} labels", x.nrows()),
            actual: format!("{} labels", y.len()),
        });
    }
    if let Some(bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(PipelineError::DataError(format!(
            "labels must be binary 0/1, found {}",
            bad
        )));
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn open_artifact(path: &Path) -> Result<BufReader<File>> {
    if !path.exists() {
        return Err(PipelineError::FileNotFound(path.display().to_string()));
    }
    Ok(BufReader::new(File::open(path)?))
}

pub(crate) fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    create_parent(path)?;
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, value)?;
    Ok(())
}

pub(crate) fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(bincode::deserialize_from(open_artifact(path)?)?)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    create_parent(path)?;
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(serde_json::from_reader(open_artifact(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_algorithm_tags() {
        assert_eq!("random_forest".parse::<Algorithm>().unwrap(), Algorithm::RandomForest);
        assert_eq!("gradient_boosting".parse::<Algorithm>().unwrap(), Algorithm::XGBoost);
        assert_eq!(" Neural_Network ".parse::<Algorithm>().unwrap(), Algorithm::NeuralNetwork);
        for algo in Algorithm::ALL {
            assert_eq!(algo.tag().parse::<Algorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn test_unknown_tag_is_named() {
        let err = create_model("svm").err().unwrap();
        assert!(matches!(&err, PipelineError::UnknownAlgorithm(tag) if tag == "svm"));
        assert_eq!(err.to_string(), "Unknown model type: svm");
    }

    #[test]
    fn test_factory_owns_extension() {
        let requested = Path::new("models/churn.pkl");
        assert_eq!(Algorithm::RandomForest.artifact_path(requested), PathBuf::from("models/churn.bin"));
        assert_eq!(Algorithm::XGBoost.artifact_path(requested), PathBuf::from("models/churn.json"));
        assert_eq!(
            Algorithm::NeuralNetwork.artifact_path(Path::new("models/churn")),
            PathBuf::from("models/churn.weights")
        );
    }

    #[test]
    fn test_factory_returns_matching_adapter() {
        for algo in Algorithm::ALL {
            assert_eq!(ModelFactory::create(algo).algorithm(), algo);
        }
    }

    #[test]
    fn test_non_binary_labels_rejected() {
        let x = array![[1.0], [2.0]];
        assert!(check_training_data(&x, &array![0.0, 1.0]).is_ok());
        assert!(matches!(
            check_training_data(&x, &array![0.0, 2.0]),
            Err(PipelineError::DataError(_))
        ));
        assert!(matches!(
            check_training_data(&x, &array![0.0]),
            Err(PipelineError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_unfitted_adapters() {
        let x = array![[1.0, 2.0]];
        let dir = tempfile::tempdir().unwrap();
        for algo in Algorithm::ALL {
            let adapter = ModelFactory::create(algo);
            assert!(matches!(adapter.predict(&x), Err(PipelineError::ModelNotFitted)));
            assert!(matches!(
                adapter.save(&dir.path().join("m")),
                Err(PipelineError::ModelNotFitted)
            ));
        }
    }
}
