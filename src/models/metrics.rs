//! Binary classification metrics

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Confusion matrix counts with label 1 as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn from_labels(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let mut counts = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t > 0.5, p > 0.5) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (false, false) => counts.true_negative += 1,
                (true, false) => counts.false_negative += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Evaluation report written to disk and returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub n_samples: usize,
    pub confusion: ConfusionCounts,
}

impl MetricsReport {
    /// Score predictions; an empty denominator scores 0
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(PipelineError::ShapeError {
                expected: format!("{} predictions", y_true.len()),
                actual: format!("{} predictions", y_pred.len()),
            });
        }
        if y_true.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }

        let c = ConfusionCounts::from_labels(y_true, y_pred);
        let precision = ratio(c.true_positive, c.true_positive + c.false_positive);
        let recall = ratio(c.true_positive, c.true_positive + c.false_negative);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Ok(Self {
            accuracy: ratio(c.true_positive + c.true_negative, c.total()),
            precision,
            recall,
            f1_score,
            n_samples: c.total(),
            confusion: c,
        })
    }

    /// Scalar metrics keyed by name, for the tracker
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("precision".to_string(), self.precision),
            ("recall".to_string(), self.recall),
            ("f1_score".to_string(), self.f1_score),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_classifier() {
        let y = array![0.0, 1.0, 1.0, 0.0, 1.0];
        let report = MetricsReport::compute(&y, &y).unwrap();
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.recall, 1.0);
        assert_eq!(report.f1_score, 1.0);
    }

    #[test]
    fn test_no_positive_predictions_scores_zero() {
        let y_true = array![1.0, 0.0, 1.0, 0.0];
        let y_pred = array![0.0, 0.0, 0.0, 0.0];
        let report = MetricsReport::compute(&y_true, &y_pred).unwrap();
        assert_eq!(report.accuracy, 0.5);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.recall, 0.0);
        assert_eq!(report.f1_score, 0.0);
    }

    #[test]
    fn test_mixed_counts() {
        let y_true = array![1.0, 1.0, 0.0, 0.0];
        let y_pred = array![1.0, 0.0, 1.0, 0.0];
        let report = MetricsReport::compute(&y_true, &y_pred).unwrap();
        assert_eq!(
            report.confusion,
            ConfusionCounts {
                true_positive: 1,
                false_positive: 1,
                true_negative: 1,
                false_negative: 1
            }
        );
        assert_eq!(report.precision, 0.5);
        assert_eq!(report.as_map()["f1_score"], 0.5);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(MetricsReport::compute(&array![1.0], &array![1.0, 0.0]).is_err());
        assert!(matches!(
            MetricsReport::compute(&Array1::zeros(0), &Array1::zeros(0)),
            Err(PipelineError::EmptyDataset)
        ));
    }
}
