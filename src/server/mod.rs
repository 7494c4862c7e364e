//! HTTP server for the tabular pipeline
//!
//! REST endpoints for data processing, training, testing and prediction.

mod api;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use state::AppState;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

const DEFAULT_MAX_UPLOAD: usize = 100 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub project_name: String,
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub tracking_dir: PathBuf,
    pub max_upload_size: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env_or("API_HOST", "0.0.0.0"),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            project_name: env_or("PROJECT_NAME", "Tabular Pipeline"),
            data_dir: env_or("DATA_DIR", "./data").into(),
            models_dir: env_or("MODELS_DIR", "./models").into(),
            reports_dir: env_or("REPORTS_DIR", "./reports").into(),
            tracking_dir: env_or("TRACKING_DIR", "./mlruns").into(),
            max_upload_size: std::env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD),
        }
    }
}

impl ServerConfig {
    /// All working directories under one root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("data"),
            models_dir: root.join("models"),
            reports_dir: root.join("reports"),
            tracking_dir: root.join("mlruns"),
            ..Self::default()
        }
    }
}

/// Start the server with the given configuration
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    for dir in [&config.data_dir, &config.models_dir, &config.reports_dir, &config.tracking_dir] {
        std::fs::create_dir_all(dir)?;
    }
    info!(
        data_dir = %config.data_dir.display(),
        models_dir = %config.models_dir.display(),
        reports_dir = %config.reports_dir.display(),
        "Server directories ready"
    );

    let app = create_router(Arc::new(AppState::new(config.clone())));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        project = %config.project_name,
        address = %addr,
        max_upload_size_mb = config.max_upload_size / 1024 / 1024,
        "Server listening"
    );

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
            return;
        }
        let uptime = chrono::Utc::now().signed_duration_since(start_time);
        info!(uptime_secs = uptime.num_seconds(), "Shutdown signal received, stopping server");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_config_paths() {
        let config = ServerConfig::with_root("/tmp/x");
        assert_eq!(config.models_dir, PathBuf::from("/tmp/x/models"));
        assert_eq!(config.tracking_dir, PathBuf::from("/tmp/x/mlruns"));
    }
}
