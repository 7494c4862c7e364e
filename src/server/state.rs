//! Application state

use std::path::{Path, PathBuf};

use super::ServerConfig;

/// Shared across handlers. Read-only: each request builds its own services.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.config.data_dir.join("uploads")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.config.data_dir.join("processed")
    }
}

/// Last component of a client-supplied name, or `fallback` when it has none
pub fn base_name(name: &Path, fallback: &str) -> String {
    name.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Place a client-supplied output path under `dir`, keeping only its file name
pub fn path_under(dir: &Path, requested: &Path, fallback: &str) -> PathBuf {
    dir.join(base_name(requested, fallback))
}
