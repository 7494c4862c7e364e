//! Tabular file loading, column checks and array extraction

use std::fs::{self, File};
use std::path::Path;

use ndarray::{Array1, Array2};
use polars::prelude::*;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// File formats accepted as raw input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Tsv,
    Parquet,
    Json,
}

impl DataFormat {
    /// Detect format from the path extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "parquet" | "pq" => Ok(Self::Parquet),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(PipelineError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Load a tabular file into a DataFrame.
///
/// Fails with `FileNotFound` before touching the parser so callers can tell a
/// missing upload from a malformed one.
pub fn load_frame(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PipelineError::FileNotFound(path.display().to_string()));
    }
    let format = DataFormat::from_path(path)?;
    let file = File::open(path)?;

    let df = match format {
        DataFormat::Csv | DataFormat::Tsv => {
            let separator = if format == DataFormat::Tsv { b'\t' } else { b',' };
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(1000))
                .with_parse_options(CsvParseOptions::default().with_separator(separator))
                .into_reader_with_file_handle(file)
                .finish()?
        }
        DataFormat::Parquet => ParquetReader::new(file).finish()?,
        DataFormat::Json => JsonReader::new(file).finish()?,
    };

    debug!(path = %path.display(), rows = df.height(), columns = df.width(), "Loaded data file");
    Ok(df)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|s| s.to_string()).collect()
}

/// Fail with every requested column the frame lacks
pub fn require_columns<'a, I>(df: &DataFrame, required: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let present = column_names(df);
    let mut missing: Vec<String> = Vec::new();
    for name in required {
        if !present.contains(name) && !missing.contains(name) {
            missing.push(name.clone());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingColumns(missing))
    }
}

/// Values of one column as `f64`.
///
/// The cast is strict: text that does not parse as a number fails instead of
/// becoming null, and any null left in the column is an error.
fn numeric_column(df: &DataFrame, name: &str, role: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| PipelineError::MissingColumns(vec![name.to_string()]))?;
    let casted = column
        .as_materialized_series()
        .strict_cast(&DataType::Float64)
        .map_err(|_| {
            PipelineError::DataError(format!(
                "{} column '{}' has non-numeric values (dtype {})",
                role,
                name,
                column.dtype()
            ))
        })?;
    let values = casted.f64()?;

    let null_count = values.null_count();
    if null_count > 0 {
        return Err(PipelineError::DataError(format!(
            "{} column '{}' has {} missing values",
            role, name, null_count
        )));
    }
    Ok(values.into_no_null_iter().collect())
}

/// Extract named columns into a row-major `Array2<f64>`
pub fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let col_data = col_names
        .iter()
        .map(|name| numeric_column(df, name, "feature"))
        .collect::<Result<Vec<Vec<f64>>>>()?;

    Ok(Array2::from_shape_fn((n_rows, col_names.len()), |(r, c)| col_data[c][r]))
}

/// Extract the label column. Missing labels are an error here; the data
/// service is the only place that drops them.
pub fn target_to_array1(df: &DataFrame, target: &str) -> Result<Array1<f64>> {
    Ok(Array1::from(numeric_column(df, target, "target")?))
}

/// Load a file and split it into a feature matrix and label vector
pub fn load_xy(path: &Path, features: &[String], target: &str) -> Result<(Array2<f64>, Array1<f64>)> {
    let df = load_frame(path)?;
    require_columns(&df, features.iter().chain(std::iter::once(&target.to_string())))?;
    let x = columns_to_array2(&df, features)?;
    let y = target_to_array1(&df, target)?;
    Ok((x, y))
}

/// Write a frame as CSV, creating parent directories first
pub fn save_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}
