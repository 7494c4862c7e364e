//! Single-row inference request/response types

use serde::{Deserialize, Serialize};

/// Feature vector for one prediction, in training column order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionInput {
    pub model_type: String,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionOutput {
    /// Positive-class probability
    pub prediction: f64,
    /// 0 or 1
    pub class_label: i64,
    /// Probability of the returned label
    pub confidence: f64,
}

impl PredictionOutput {
    pub fn from_probability(p: f64) -> Self {
        let class_label = if p >= 0.5 { 1 } else { 0 };
        let confidence = if class_label == 1 { p } else { 1.0 - p };
        Self {
            prediction: p,
            class_label,
            confidence,
        }
    }
}
