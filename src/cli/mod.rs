//! Command-line interface
//!
//! Each pipeline stage runs from a JSON config file; `serve` starts the API.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::data::DataService;
use crate::ml::MlService;
use crate::schemas::{DataProcessingConfig, MLPipelineConfig, TestingConfig};
use crate::server::{run_server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "tabular-pipeline", version, about = "Config-driven tabular ML pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address, overrides API_HOST
        #[arg(long)]
        host: Option<String>,

        /// Port, overrides API_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Split a raw dataset into train/test files
    Process {
        /// DataProcessingConfig JSON file
        config: PathBuf,
    },

    /// Train a model from a pipeline config
    Train {
        /// MLPipelineConfig JSON file
        config: PathBuf,

        /// Directory for experiment runs
        #[arg(long, env = "TRACKING_DIR", default_value = "./mlruns")]
        tracking_dir: PathBuf,
    },

    /// Evaluate a trained model
    Test {
        /// TestingConfig JSON file
        config: PathBuf,
    },
}

fn read_config<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn cmd_serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = ServerConfig::default();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    run_server(config).await
}

pub fn cmd_process(config_path: &Path) -> anyhow::Result<()> {
    let config: DataProcessingConfig = read_config(config_path)?;
    let start = Instant::now();
    let summary = DataService::new().process_data(&config)?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Processing finished");
    print_json(&summary)
}

pub fn cmd_train(config_path: &Path, tracking_dir: &Path) -> anyhow::Result<()> {
    let config: MLPipelineConfig = read_config(config_path)?;
    let start = Instant::now();
    let outcome = MlService::new(tracking_dir).train_from_config(&config)?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Training finished");
    print_json(&outcome)
}

pub fn cmd_test(config_path: &Path) -> anyhow::Result<()> {
    let config: TestingConfig = read_config(config_path)?;
    let report = MlService::default().test_from_config(&config)?;
    print_json(&report)
}
