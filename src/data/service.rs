//! Raw data processing: validate, clean, split, persist

use std::path::PathBuf;

use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::loader::{column_names, load_frame, require_columns, save_csv};
use crate::error::{PipelineError, Result};
use crate::schemas::{strip_target, DataProcessingConfig};

/// Outcome of a processing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub status: String,
    pub train_rows: usize,
    pub test_rows: usize,
    pub dropped_rows: usize,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub feature_columns: Vec<String>,
}

/// Row indices of a train/test partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partition `n_rows` rows.
///
/// `n_test = ceil(n_rows * test_size)` and both sides must be non-empty.
pub fn split_indices(n_rows: usize, test_size: f64, shuffle: bool, seed: u64) -> Result<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "test_size must be between 0 and 1, got {}",
            test_size
        )));
    }

    let n_test = (n_rows as f64 * test_size).ceil() as usize;
    let n_train = n_rows.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "test_size={} with {} rows leaves an empty train or test split",
            test_size, n_rows
        )));
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    if shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
    }

    let test = indices.split_off(n_train);
    Ok(SplitIndices { train: indices, test })
}

fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = rows.iter().map(|&i| i as IdxSize).collect();
    let idx = IdxCa::from_vec("idx".into(), idx);
    Ok(df.take(&idx)?)
}

/// Data service. Stateless; one instance per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataService;

impl DataService {
    pub fn new() -> Self {
        Self
    }

    /// Validate, clean and split the raw file, writing both splits to disk
    pub fn process_data(&self, config: &DataProcessingConfig) -> Result<ProcessSummary> {
        config.validate()?;

        info!(path = %config.raw_data_path.display(), "Processing raw data");
        let df = load_frame(&config.raw_data_path)?;

        require_columns(
            &df,
            config.feature_columns.iter().chain(std::iter::once(&config.target_column)),
        )?;
        debug!(columns = ?column_names(&df), "Required columns present");

        let mut features = config.feature_columns.clone();
        strip_target(&mut features, &config.target_column);
        if features.is_empty() {
            return Err(PipelineError::InvalidConfig("no feature columns left after removing the target".to_string()));
        }

        let mask = df.column(&config.target_column)?.as_materialized_series().is_not_null();
        let cleaned = df.filter(&mask)?;
        let dropped_rows = df.height() - cleaned.height();
        if cleaned.height() == 0 {
            return Err(PipelineError::EmptyDataset);
        }

        let mut selection = features.clone();
        selection.push(config.target_column.clone());
        let selected = cleaned.select(selection)?;

        let split = split_indices(selected.height(), config.test_size, config.shuffle, config.random_state)?;
        let mut train_df = take_rows(&selected, &split.train)?;
        let mut test_df = take_rows(&selected, &split.test)?;

        save_csv(&mut train_df, &config.output_train_path)?;
        save_csv(&mut test_df, &config.output_test_path)?;

        info!(
            train_rows = train_df.height(),
            test_rows = test_df.height(),
            dropped_rows,
            train_path = %config.output_train_path.display(),
            test_path = %config.output_test_path.display(),
            "Data processed"
        );

        Ok(ProcessSummary {
            status: "Data Processed".to_string(),
            train_rows: train_df.height(),
            test_rows: test_df.height(),
            dropped_rows,
            train_path: config.output_train_path.clone(),
            test_path: config.output_test_path.clone(),
            feature_columns: features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sizes_respect_ratio() {
        let split = split_indices(10, 0.25, true, 7).unwrap();
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.train.len(), 7);

        let mut all: Vec<usize> = split.train.iter().chain(split.test.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_seeded() {
        let a = split_indices(50, 0.2, true, 42).unwrap();
        let b = split_indices(50, 0.2, true, 42).unwrap();
        let c = split_indices(50, 0.2, true, 43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_without_shuffle_keeps_order() {
        let split = split_indices(5, 0.4, false, 0).unwrap();
        assert_eq!(split.train, vec![0, 1, 2]);
        assert_eq!(split.test, vec![3, 4]);
    }

    #[test]
    fn test_split_rejects_degenerate() {
        assert!(split_indices(1, 0.2, true, 0).is_err());
        assert!(split_indices(10, 0.0, true, 0).is_err());
    }
}
