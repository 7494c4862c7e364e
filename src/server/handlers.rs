//! HTTP request handlers
//!
//! Each handler reads the multipart form, stores uploads under the data
//! directory, builds a config (inline JSON or derived from the upload's
//! header row) and runs the blocking service call on the blocking pool.
//!
//! Uploads are removed when the handler returns. Output paths in an inline
//! config keep only their file name and land under the server's directories.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::data::{load_frame, loader::column_names, DataService};
use crate::ml::{MlService, TrainOutcome};
use crate::models::MetricsReport;
use crate::schemas::{
    DataConfig, DataProcessingConfig, MLPipelineConfig, ModelConfig, PredictionInput, PredictionOutput,
    TestingConfig, TrainingConfig,
};

use super::error::{Result, ServerError};
use super::state::{base_name, path_under, AppState};

struct Upload {
    file_name: String,
    data: Bytes,
}

/// Multipart form split into file parts and text parts
#[derive(Default)]
struct Form {
    files: HashMap<String, Upload>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            match file_name {
                Some(file_name) => {
                    let data = field.bytes().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                    info!(field = %name, file_name = %file_name, bytes = data.len(), "Received upload");
                    form.files.insert(name, Upload { file_name, data });
                }
                None => {
                    let text = field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    fn file(&self, name: &str) -> Result<&Upload> {
        self.files
            .get(name)
            .ok_or_else(|| ServerError::BadRequest(format!("Missing file field '{}'", name)))
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|s| !s.trim().is_empty())
    }

    fn required_text(&self, name: &str) -> Result<String> {
        self.text(name)
            .map(str::to_string)
            .ok_or_else(|| ServerError::BadRequest(format!("Provide either 'config' or '{}'", name)))
    }

    fn flag(&self, name: &str) -> bool {
        self.text(name).map_or(false, |v| v.eq_ignore_ascii_case("true"))
    }
}

fn parse_json<T: DeserializeOwned>(field: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| ServerError::BadRequest(format!("Invalid '{}' JSON: {}", field, e)))
}

/// Write an upload under the uploads directory. The file is deleted when the
/// returned handle drops; the client's extension is kept for format detection.
async fn save_upload(state: &AppState, upload: &Upload) -> Result<NamedTempFile> {
    let dir = state.uploads_dir();
    tokio::fs::create_dir_all(&dir).await?;
    let suffix = format!("_{}", base_name(Path::new(&upload.file_name), "upload"));
    let file = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(&suffix)
        .tempfile_in(&dir)?;
    tokio::fs::write(file.path(), &upload.data).await?;
    debug!(path = %file.path().display(), "Stored upload");
    Ok(file)
}

/// Run a service call on the blocking pool
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("worker task failed: {}", e)))?
        .map_err(ServerError::from)
}

async fn read_header(path: &Path) -> Result<Vec<String>> {
    let path = path.to_path_buf();
    run_blocking(move || load_frame(&path).map(|df| column_names(&df))).await
}

fn features_without(header: &[String], target: &str) -> Vec<String> {
    header.iter().filter(|c| c.as_str() != target).cloned().collect()
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": format!("{} API is running", state.config.project_name),
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": state.config.project_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    stream: Option<String>,
}

/// Split an uploaded raw file into train/test CSVs
pub async fn process_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
    multipart: Multipart,
) -> Result<Response> {
    let stream_train = match query.stream.as_deref() {
        None => None,
        Some("train") => Some(true),
        Some("test") => Some(false),
        Some(other) => {
            return Err(ServerError::BadRequest(format!(
                "stream must be 'train' or 'test', got '{}'",
                other
            )))
        }
    };

    let form = Form::read(multipart).await?;
    let raw_upload = save_upload(&state, form.file("file")?).await?;
    let raw_path = raw_upload.path().to_path_buf();
    let id = new_id();

    let config = match form.text("config") {
        Some(raw) => {
            let mut config: DataProcessingConfig = parse_json("config", raw)?;
            let processed_dir = state.processed_dir();
            let train_name = base_name(&config.output_train_path, "train.csv");
            let test_name = base_name(&config.output_test_path, "test.csv");
            config.raw_data_path = raw_path;
            config.output_train_path = processed_dir.join(format!("{}_{}", id, train_name));
            config.output_test_path = processed_dir.join(format!("{}_{}", id, test_name));
            if config.output_train_path == config.output_test_path {
                return Err(ServerError::BadRequest(
                    "output_train_path and output_test_path need different file names".to_string(),
                ));
            }
            config
        }
        None => {
            let target = form.required_text("target_column")?;
            let header = read_header(&raw_path).await?;
            DataProcessingConfig::derive_from_header(raw_path, &header, &target, &state.processed_dir(), &id)
        }
    };

    let summary = run_blocking(move || DataService::new().process_data(&config)).await?;

    let Some(train) = stream_train else {
        return Ok(Json(summary).into_response());
    };
    let path = if train { &summary.train_path } else { &summary.test_path };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "split.csv".to_string());
    let body = tokio::fs::read(path).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        body,
    )
        .into_response())
}

/// Train a model on an uploaded training file
pub async fn train_model(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Json<TrainOutcome>> {
    let form = Form::read(multipart).await?;
    let data_upload = save_upload(&state, form.file("file")?).await?;
    let data_path = data_upload.path().to_path_buf();

    let config = match form.text("config") {
        Some(raw) => {
            let mut config: MLPipelineConfig = parse_json("config", raw)?;
            config.data.train_csv_path = data_path;
            config.data.test_csv_path = None;
            config.training.save_model_path =
                path_under(&state.config.models_dir, &config.training.save_model_path, "model");
            config
        }
        None => {
            let target = form.required_text("target_column")?;
            let model_type = form.required_text("model_type")?;
            let params = match form.text("params") {
                Some(raw) => parse_json("params", raw)?,
                None => HashMap::new(),
            };
            let header = read_header(&data_path).await?;
            MLPipelineConfig {
                experiment_name: format!("api_{}", model_type),
                data: DataConfig {
                    train_csv_path: data_path,
                    test_csv_path: None,
                    feature_columns: features_without(&header, &target),
                    target_column: target,
                    shuffle: true,
                    test_size: 0.2,
                },
                training: TrainingConfig {
                    save_model_path: state.config.models_dir.join(format!("{}_{}", model_type, new_id())),
                    cv_folds: None,
                    track: form.flag("track"),
                    run_name: None,
                },
                model: ModelConfig { model_type, params },
            }
        }
    };

    let tracking_dir = state.config.tracking_dir.clone();
    let outcome = run_blocking(move || MlService::new(tracking_dir).train_from_config(&config)).await?;
    Ok(Json(outcome))
}

/// Evaluate an uploaded model artifact against an uploaded test file
pub async fn test_model(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Json<MetricsReport>> {
    let form = Form::read(multipart).await?;
    let test_upload = save_upload(&state, form.file("file")?).await?;
    let model_upload = save_upload(&state, form.file("model")?).await?;
    let test_path = test_upload.path().to_path_buf();
    let model_path = model_upload.path().to_path_buf();

    let config = match form.text("config") {
        Some(raw) => {
            let mut config: TestingConfig = parse_json("config", raw)?;
            config.test_csv_path = test_path;
            config.model_path = model_path;
            config.report_path = path_under(&state.config.reports_dir, &config.report_path, "report.json");
            config
        }
        None => {
            let target = form.required_text("target_column")?;
            let model_type = form.required_text("model_type")?;
            let header = read_header(&test_path).await?;
            TestingConfig {
                experiment_name: format!("api_{}", model_type),
                test_csv_path: test_path,
                model_path,
                feature_columns: features_without(&header, &target),
                target_column: target,
                report_path: state.config.reports_dir.join(format!("{}_report.json", new_id())),
                model_type,
            }
        }
    };

    let tracking_dir = state.config.tracking_dir.clone();
    let report = run_blocking(move || MlService::new(tracking_dir).test_from_config(&config)).await?;
    Ok(Json(report))
}

/// Single-row prediction with an uploaded artifact
pub async fn predict(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Json<PredictionOutput>> {
    let form = Form::read(multipart).await?;
    let model_upload = save_upload(&state, form.file("model")?).await?;
    let model_path = model_upload.path().to_path_buf();
    let raw = form
        .text("input")
        .ok_or_else(|| ServerError::BadRequest("Missing 'input' field".to_string()))?;
    let input: PredictionInput = parse_json("input", raw)?;

    let tracking_dir = state.config.tracking_dir.clone();
    let output = run_blocking(move || {
        MlService::new(tracking_dir).predict_single(&input.model_type, &model_path, &input.features)
    })
    .await?;
    Ok(Json(output))
}
