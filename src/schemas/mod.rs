//! Request schemas
//!
//! JSON-facing configuration for data processing, training, testing and
//! single-row prediction.

mod config;
mod prediction;

pub use config::{
    DataConfig, DataProcessingConfig, MLPipelineConfig, ModelConfig, TestingConfig, TrainingConfig,
};
pub(crate) use config::strip_target;
pub use prediction::{PredictionInput, PredictionOutput};
