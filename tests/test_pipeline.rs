//! Integration test: data processing, training, testing and persistence

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde_json::json;
use tabular_pipeline::data::{load_frame, DataService};
use tabular_pipeline::ml::MlService;
use tabular_pipeline::models::{Algorithm, MetricsReport, ModelFactory};
use tabular_pipeline::schemas::{DataProcessingConfig, MLPipelineConfig, TestingConfig};
use tabular_pipeline::PipelineError;

fn write_csv(path: &Path, mut df: DataFrame) {
    let mut file = std::fs::File::create(path).unwrap();
    CsvWriter::new(&mut file).finish(&mut df).unwrap();
}

fn classification_frame(n: usize) -> DataFrame {
    let x1: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x2: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64).collect();
    let label: Vec<i64> = (0..n).map(|i| if i >= n / 2 { 1 } else { 0 }).collect();
    df!("x1" => x1, "x2" => x2, "label" => label).unwrap()
}

fn processing_config(dir: &Path, raw: PathBuf, features: &[&str]) -> DataProcessingConfig {
    DataProcessingConfig {
        raw_data_path: raw,
        target_column: "label".to_string(),
        feature_columns: features.iter().map(|s| s.to_string()).collect(),
        test_size: 0.25,
        random_state: 42,
        shuffle: true,
        output_train_path: dir.join("out/train.csv"),
        output_test_path: dir.join("out/test.csv"),
    }
}

#[test]
fn test_missing_feature_column_is_named() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.csv");
    write_csv(&raw, classification_frame(10));

    let config = processing_config(dir.path(), raw, &["x1", "zip_code"]);
    let err = DataService::new().process_data(&config).unwrap_err();
    match &err {
        PipelineError::MissingColumns(cols) => assert_eq!(cols, &vec!["zip_code".to_string()]),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("zip_code"));
}

#[test]
fn test_target_removed_and_split_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.csv");
    write_csv(&raw, classification_frame(21));

    let config = processing_config(dir.path(), raw, &["x1", "label", "x2"]);
    let summary = DataService::new().process_data(&config).unwrap();

    assert_eq!(summary.feature_columns, vec!["x1", "x2"]);
    assert_eq!(summary.train_rows + summary.test_rows, 21);
    assert_eq!(summary.test_rows, 6);

    let train = load_frame(&summary.train_path).unwrap();
    let names: Vec<String> = train.get_column_names().iter().map(|s| s.to_string()).collect();
    assert_eq!(names, vec!["x1", "x2", "label"]);
}

#[test]
fn test_null_targets_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.csv");
    std::fs::write(&raw, "x1,label\n1,0\n2,\n3,1\n4,\n5,0\n6,1\n").unwrap();

    let config = processing_config(dir.path(), raw, &["x1"]);
    let summary = DataService::new().process_data(&config).unwrap();
    assert_eq!(summary.dropped_rows, 2);
    assert_eq!(summary.train_rows + summary.test_rows, 4);
}

#[test]
fn test_all_null_targets_is_empty_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.csv");
    std::fs::write(&raw, "x1,label\n1,\n2,\n").unwrap();

    let config = processing_config(dir.path(), raw, &["x1"]);
    let err = DataService::new().process_data(&config).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyDataset));
}

#[test]
fn test_save_load_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let n = 40;
    let x = Array2::from_shape_fn((n, 3), |(i, j)| ((i * (j + 3)) % 11) as f64 + i as f64 * 0.1);
    let y: Array1<f64> = (0..n).map(|i| if i % 3 == 0 || i > 30 { 1.0 } else { 0.0 }).collect();
    let params = json!({ "n_estimators": 8, "epochs": 5, "random_state": 3 });

    for algo in Algorithm::ALL {
        let params = match algo {
            Algorithm::NeuralNetwork => params.clone(),
            _ => json!({ "n_estimators": 8, "random_state": 3 }),
        };
        let mut model = ModelFactory::create(algo);
        model.train(&x, &y, &params).unwrap();

        let path = algo.artifact_path(&dir.path().join(format!("model_{}", algo.tag())));
        model.save(&path).unwrap();

        let mut restored = ModelFactory::create(algo);
        restored.load(&path).unwrap();

        assert_eq!(
            model.predict_proba(&x).unwrap(),
            restored.predict_proba(&x).unwrap(),
            "{} changed after reload",
            algo
        );
        assert_eq!(model.predict(&x).unwrap(), restored.predict(&x).unwrap());
    }
}

#[test]
fn test_perfect_classifier_metrics() {
    let y = Array1::from(vec![1.0, 0.0, 1.0, 1.0, 0.0]);
    let report = MetricsReport::compute(&y, &y).unwrap();
    assert_eq!(
        (report.accuracy, report.precision, report.recall, report.f1_score),
        (1.0, 1.0, 1.0, 1.0)
    );
}

#[test]
fn test_train_then_test_from_configs() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_csv(&root.join("train.csv"), classification_frame(30));
    write_csv(&root.join("test.csv"), classification_frame(12));

    let pipeline: MLPipelineConfig = serde_json::from_value(json!({
        "experiment_name": "churn",
        "data": {
            "train_csv_path": root.join("train.csv"),
            "target_column": "label",
            "feature_columns": ["x1", "x2", "label"]
        },
        "model": { "type": "xgboost", "params": { "n_estimators": 20, "random_state": 0 } },
        "training": {
            "save_model_path": root.join("models/churn.pkl"),
            "cv_folds": 3,
            "track": true
        }
    }))
    .unwrap();

    let service = MlService::new(root.join("mlruns"));
    let outcome = service.train_from_config(&pipeline).unwrap();
    assert_eq!(outcome.model_type, "xgboost");
    assert_eq!(outcome.model_path, root.join("models/churn.json"));
    assert!(outcome.model_path.exists());
    assert_eq!(outcome.result.n_features, 2);
    assert!(outcome.cv_accuracy.is_some());
    assert!(outcome.run_id.is_some());

    let testing = TestingConfig {
        experiment_name: "churn".to_string(),
        test_csv_path: root.join("test.csv"),
        model_path: outcome.model_path.clone(),
        model_type: "xgboost".to_string(),
        target_column: "label".to_string(),
        feature_columns: vec!["x1".to_string(), "x2".to_string()],
        report_path: root.join("reports/churn.json"),
    };
    let report = service.test_from_config(&testing).unwrap();
    assert!(report.accuracy > 0.0);
    assert!(root.join("reports/churn.json").exists());
}

#[test]
fn test_unknown_algorithm_in_pipeline() {
    let pipeline: MLPipelineConfig = serde_json::from_value(json!({
        "experiment_name": "e",
        "data": { "train_csv_path": "x.csv", "target_column": "y", "feature_columns": ["a"] },
        "model": { "type": "svm" },
        "training": { "save_model_path": "m" }
    }))
    .unwrap();
    let err = MlService::default().train_from_config(&pipeline).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownAlgorithm(ref tag) if tag == "svm"));
}
