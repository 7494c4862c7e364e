//! Tabular Pipeline - config-driven training service for tabular data
//!
//! - [`data`] - loading, validation and train/test splitting
//! - [`models`] - model adapters, the factory that selects them, metrics
//! - [`ml`] - training, evaluation and prediction orchestration
//! - [`tracking`] - file-backed experiment runs
//! - [`server`] - REST API
//! - [`cli`] - command-line interface

pub mod error;
pub mod schemas;

pub mod data;
pub mod models;
pub mod ml;
pub mod tracking;

pub mod server;
pub mod cli;

pub use error::{PipelineError, Result};
pub use models::{create_model, Algorithm, ModelAdapter, ModelFactory};
