//! Storage backends for experiment runs

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use super::Run;
use crate::error::{PipelineError, Result};

/// Persistence for runs and their artifacts
pub trait StorageBackend: Send + Sync {
    /// Write (or overwrite) one run
    fn save_run(&self, run: &Run) -> Result<()>;

    fn load_run(&self, experiment: &str, run_id: &str) -> Result<Run>;

    /// Every run recorded under an experiment, oldest first
    fn list_runs(&self, experiment: &str) -> Result<Vec<Run>>;

    /// Directory that holds a run's artifacts
    fn artifact_dir(&self, experiment: &str, run_id: &str) -> PathBuf;

    fn is_available(&self) -> bool;
}

/// Directory-per-run layout: `<root>/<experiment>/<run_id>/run.json`
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn experiment_dir(&self, experiment: &str) -> PathBuf {
        self.base_dir.join(dir_name(experiment))
    }

    fn run_dir(&self, experiment: &str, run_id: &str) -> PathBuf {
        self.experiment_dir(experiment).join(run_id)
    }

    fn run_file(&self, experiment: &str, run_id: &str) -> PathBuf {
        self.run_dir(experiment, run_id).join("run.json")
    }
}

/// Experiment names come from requests; keep them to one path component
fn dir_name(experiment: &str) -> String {
    let cleaned: String = experiment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

fn tracking_err(context: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Tracking(format!("{}: {}", context, err))
}

impl StorageBackend for LocalStorage {
    fn save_run(&self, run: &Run) -> Result<()> {
        let dir = self.run_dir(&run.experiment, &run.run_id);
        fs::create_dir_all(&dir).map_err(|e| tracking_err("Failed to create run directory", e))?;

        let file = File::create(dir.join("run.json")).map_err(|e| tracking_err("Failed to create run file", e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), run)
            .map_err(|e| tracking_err("Failed to write run", e))
    }

    fn load_run(&self, experiment: &str, run_id: &str) -> Result<Run> {
        let path = self.run_file(experiment, run_id);
        let file = File::open(&path).map_err(|e| tracking_err(&format!("Failed to open {}", path.display()), e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| tracking_err("Failed to parse run", e))
    }

    fn list_runs(&self, experiment: &str) -> Result<Vec<Run>> {
        let dir = self.experiment_dir(experiment);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| tracking_err("Failed to read experiment", e))? {
            let entry = entry?;
            if !entry.path().join("run.json").exists() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().to_string();
            runs.push(self.load_run(experiment, &run_id)?);
        }
        runs.sort_by_key(|r| r.start_time);
        Ok(runs)
    }

    fn artifact_dir(&self, experiment: &str, run_id: &str) -> PathBuf {
        self.run_dir(experiment, run_id).join("artifacts")
    }

    fn is_available(&self) -> bool {
        fs::create_dir_all(&self.base_dir).is_ok()
    }
}
