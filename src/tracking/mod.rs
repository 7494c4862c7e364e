//! Experiment tracking
//!
//! Records parameters, metrics and artifacts of training runs. Each run is a
//! separate file, so concurrent requests never contend on shared state.

mod storage;

pub use storage::{LocalStorage, StorageBackend};

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// A single tracked run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub experiment: String,
    pub run_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    /// Artifact paths relative to the run's artifact directory
    pub artifacts: Vec<String>,
}

impl Run {
    fn new(experiment: &str, run_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            experiment: experiment.to_string(),
            run_name: run_name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn log_param(&mut self, key: impl Into<String>, value: impl Display) {
        self.params.insert(key.into(), value.to_string());
    }

    pub fn log_params<K, V, I>(&mut self, params: I)
    where
        K: Into<String>,
        V: Display,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in params {
            self.log_param(k, v);
        }
    }

    pub fn log_metric(&mut self, key: impl Into<String>, value: f64) {
        self.metrics.insert(key.into(), value);
    }

    pub fn log_metrics<K: Into<String>>(&mut self, metrics: impl IntoIterator<Item = (K, f64)>) {
        for (k, v) in metrics {
            self.log_metric(k, v);
        }
    }

    /// Seconds between start and end (or now, while running)
    pub fn duration_secs(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Entry point for recording runs
pub struct ExperimentTracker {
    storage: Box<dyn StorageBackend>,
}

impl ExperimentTracker {
    pub fn new(storage: Box<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Tracker writing under a local directory
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(LocalStorage::new(root)))
    }

    /// Open a run and persist it immediately as running
    pub fn start_run(&self, experiment: &str, run_name: &str) -> Result<Run> {
        if !self.storage.is_available() {
            return Err(PipelineError::Tracking("storage is not available".to_string()));
        }
        let run = Run::new(experiment, run_name);
        self.storage.save_run(&run)?;
        info!(experiment, run_id = %run.run_id, run_name, "Tracking run started");
        Ok(run)
    }

    /// Copy a file into the run's artifact directory
    pub fn log_artifact(&self, run: &mut Run, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| PipelineError::Tracking(format!("not a file: {}", path.display())))?;
        if !path.is_file() {
            return Err(PipelineError::FileNotFound(path.display().to_string()));
        }

        let dir = self.storage.artifact_dir(&run.experiment, &run.run_id);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(file_name);
        fs::copy(path, &dest)?;

        run.artifacts.push(file_name.to_string_lossy().to_string());
        debug!(run_id = %run.run_id, artifact = %dest.display(), "Artifact logged");
        Ok(dest)
    }

    /// Close the run and write its final state
    pub fn end_run(&self, run: &mut Run, status: RunStatus) -> Result<()> {
        run.status = status;
        run.end_time = Some(Utc::now());
        self.storage.save_run(run)?;
        info!(
            run_id = %run.run_id,
            status = ?status,
            duration_secs = run.duration_secs(),
            "Tracking run ended"
        );
        Ok(())
    }

    pub fn get_run(&self, experiment: &str, run_id: &str) -> Result<Run> {
        self.storage.load_run(experiment, run_id)
    }

    pub fn list_runs(&self, experiment: &str) -> Result<Vec<Run>> {
        self.storage.list_runs(experiment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::local(dir.path());

        let mut run = tracker.start_run("churn", "baseline").unwrap();
        run.log_param("model_type", "random_forest");
        run.log_params([("n_estimators", 50)]);
        run.log_metrics([("accuracy", 0.9), ("f1_score", 0.8)]);

        let model = dir.path().join("model.bin");
        fs::write(&model, b"weights").unwrap();
        let copied = tracker.log_artifact(&mut run, &model).unwrap();
        assert!(copied.exists());

        tracker.end_run(&mut run, RunStatus::Finished).unwrap();

        let stored = tracker.get_run("churn", &run.run_id).unwrap();
        assert_eq!(stored.status, RunStatus::Finished);
        assert_eq!(stored.params["n_estimators"], "50");
        assert_eq!(stored.metrics["accuracy"], 0.9);
        assert_eq!(stored.artifacts, vec!["model.bin"]);
        assert!(stored.end_time.is_some());
    }

    #[test]
    fn test_runs_listed_per_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::local(dir.path());

        let mut a = tracker.start_run("exp", "a").unwrap();
        let b = tracker.start_run("exp", "b").unwrap();
        tracker.start_run("other", "c").unwrap();
        tracker.end_run(&mut a, RunStatus::Failed).unwrap();

        let runs = tracker.list_runs("exp").unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().any(|r| r.run_id == b.run_id && r.status == RunStatus::Running));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::local(dir.path());
        let mut run = tracker.start_run("exp", "r").unwrap();
        let err = tracker.log_artifact(&mut run, &dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound(_)));
    }
}
