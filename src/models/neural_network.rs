//! Feed-forward network for binary classification
//!
//! Inputs are standardized with statistics from the training set, hidden
//! layers use ReLU and the single output unit a sigmoid. Trained with
//! mini-batch Adam on binary cross-entropy. Artifacts are bincode.

use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_training_data, parse_params, read_bincode, write_bincode, Algorithm, ModelAdapter, TrainSummary};
use crate::error::{PipelineError, Result};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-7;

/// Network hyperparameters. Keys the network does not know are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralNetworkParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub hidden_layers: Vec<usize>,
    pub random_state: Option<u64>,
}

impl Default for NeuralNetworkParams {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            hidden_layers: vec![16, 8],
            random_state: None,
        }
    }
}

impl NeuralNetworkParams {
    fn validate(&self) -> Result<()> {
        let reason = if self.epochs == 0 {
            Some("epochs must be at least 1")
        } else if self.batch_size == 0 {
            Some("batch_size must be at least 1")
        } else if self.learning_rate <= 0.0 {
            Some("learning_rate must be positive")
        } else if self.hidden_layers.iter().any(|&w| w == 0) {
            Some("hidden layer widths must be positive")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(PipelineError::InvalidParams {
                algorithm: Algorithm::NeuralNetwork.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// First and second moment estimates for one parameter tensor
struct AdamState<D: ndarray::Dimension> {
    m: ndarray::Array<f64, D>,
    v: ndarray::Array<f64, D>,
}

impl<D: ndarray::Dimension> AdamState<D> {
    fn zeros_like(param: &ndarray::Array<f64, D>) -> Self {
        Self {
            m: ndarray::Array::zeros(param.raw_dim()),
            v: ndarray::Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut ndarray::Array<f64, D>, grad: &ndarray::Array<f64, D>, lr: f64, t: i32) {
        self.m = &self.m * ADAM_BETA1 + grad * (1.0 - ADAM_BETA1);
        self.v = &self.v * ADAM_BETA2 + &grad.mapv(|g| g * g) * (1.0 - ADAM_BETA2);
        let m_hat_scale = 1.0 / (1.0 - ADAM_BETA1.powi(t));
        let v_hat_scale = 1.0 / (1.0 - ADAM_BETA2.powi(t));
        ndarray::Zip::from(param)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| {
                *p -= lr * (m * m_hat_scale) / ((v * v_hat_scale).sqrt() + ADAM_EPS);
            });
    }
}

/// Fitted network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedForwardNetwork {
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl FeedForwardNetwork {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &NeuralNetworkParams) -> Result<Self> {
        params.validate()?;

        let mut rng = match params.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });

        let mut layer_sizes = vec![x.ncols()];
        layer_sizes.extend(&params.hidden_layers);
        layer_sizes.push(1);

        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        let mut biases = Vec::with_capacity(layer_sizes.len() - 1);
        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            let limit = (6.0 / (n_in + n_out) as f64).sqrt();
            weights.push(Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-limit..limit)));
            biases.push(Array1::zeros(n_out));
        }

        let mut net = Self {
            weights,
            biases,
            mean,
            scale,
        };

        let x_std = net.standardize(x);
        let targets = y.clone().insert_axis(Axis(1));
        let n_samples = x.nrows();

        let mut adam_w: Vec<AdamState<ndarray::Ix2>> = net.weights.iter().map(AdamState::zeros_like).collect();
        let mut adam_b: Vec<AdamState<ndarray::Ix1>> = net.biases.iter().map(AdamState::zeros_like).collect();
        let mut step = 0i32;
        let mut order: Vec<usize> = (0..n_samples).collect();

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(params.batch_size) {
                let xb = x_std.select(Axis(0), batch);
                let yb = targets.select(Axis(0), batch);

                let activations = net.forward(&xb);
                let output = &activations[activations.len() - 1];
                epoch_loss += bce(output, &yb) * batch.len() as f64;

                let gradients = net.backward(&activations, &yb);
                step = step.saturating_add(1);
                for (i, (gw, gb)) in gradients.iter().enumerate() {
                    adam_w[i].step(&mut net.weights[i], gw, params.learning_rate, step);
                    adam_b[i].step(&mut net.biases[i], gb, params.learning_rate, step);
                }
            }

            debug!(epoch, loss = epoch_loss / n_samples as f64, "Epoch complete");
        }

        Ok(net)
    }

    fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Check that a deserialized network's layers chain from the input
    /// statistics to a single output unit
    pub fn validate(&self) -> Result<()> {
        let mismatch = |what: String, expected: usize, actual: usize| {
            Err(PipelineError::ShapeError {
                expected: format!("{} = {}", what, expected),
                actual: format!("{} = {}", what, actual),
            })
        };
        if self.weights.is_empty() {
            return Err(PipelineError::Serialization("network has no layers".to_string()));
        }
        if self.biases.len() != self.weights.len() {
            return mismatch("bias vectors".to_string(), self.weights.len(), self.biases.len());
        }
        if self.scale.len() != self.mean.len() {
            return mismatch("scale length".to_string(), self.mean.len(), self.scale.len());
        }

        let mut width = self.mean.len();
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            if w.nrows() != width {
                return mismatch(format!("layer {} inputs", i), width, w.nrows());
            }
            if b.len() != w.ncols() {
                return mismatch(format!("layer {} bias length", i), w.ncols(), b.len());
            }
            width = w.ncols();
        }
        if width != 1 {
            return mismatch("output units".to_string(), 1, width);
        }
        Ok(())
    }

    fn standardize(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    /// Activations of every layer, input first
    fn forward(&self, x: &Array2<f64>) -> Vec<Array2<f64>> {
        let last = self.weights.len() - 1;
        let mut activations = Vec::with_capacity(self.weights.len() + 1);
        activations.push(x.clone());
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i == last {
                z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
            } else {
                z.mapv(|v| v.max(0.0))
            };
            activations.push(a);
        }
        activations
    }

    fn backward(&self, activations: &[Array2<f64>], y: &Array2<f64>) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = y.nrows() as f64;
        let mut gradients = Vec::with_capacity(self.weights.len());

        // sigmoid + cross-entropy
        let mut delta = (&activations[activations.len() - 1] - y) / n;

        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            gradients.push((grad_w, grad_b));

            if i > 0 {
                let relu_grad = activations[i].mapv(|a| if a > 0.0 { 1.0 } else { 0.0 });
                delta = delta.dot(&self.weights[i].t()) * relu_grad;
            }
        }

        gradients.reverse();
        gradients
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features() {
            return Err(PipelineError::ShapeError {
                expected: format!("{} features", self.n_features()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let activations = self.forward(&self.standardize(x));
        Ok(activations[activations.len() - 1].column(0).to_owned())
    }
}

fn bce(pred: &Array2<f64>, y: &Array2<f64>) -> f64 {
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(y.iter())
        .map(|(&p, &t)| {
            let p = p.clamp(1e-7, 1.0 - 1e-7);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / n
}

/// Neural network adapter
#[derive(Debug, Default)]
pub struct NeuralNetworkAdapter {
    model: Option<FeedForwardNetwork>,
}

impl NeuralNetworkAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelAdapter for NeuralNetworkAdapter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::NeuralNetwork
    }

    fn train(&mut self, x: &Array2<f64>, y: &Array1<f64>, params: &serde_json::Value) -> Result<TrainSummary> {
        check_training_data(x, y)?;
        let params: NeuralNetworkParams = parse_params(Algorithm::NeuralNetwork, params)?;
        self.model = Some(FeedForwardNetwork::fit(x, y, &params)?);
        Ok(TrainSummary::new(Algorithm::NeuralNetwork, x, serde_json::to_value(&params)?))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.model
            .as_ref()
            .ok_or(PipelineError::ModelNotFitted)?
            .predict_proba(x)
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_bincode(path, self.model.as_ref().ok_or(PipelineError::ModelNotFitted)?)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let model: FeedForwardNetwork = read_bincode(path)?;
        model.validate()?;
        self.model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blobs() -> (Array2<f64>, Array1<f64>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let jitter = (i % 5) as f64 * 0.1;
            if i % 2 == 0 {
                rows.extend_from_slice(&[1.0 + jitter, 2.0 - jitter]);
                labels.push(0.0);
            } else {
                rows.extend_from_slice(&[4.0 + jitter, 6.0 - jitter]);
                labels.push(1.0);
            }
        }
        (Array2::from_shape_vec((30, 2), rows).unwrap(), Array1::from(labels))
    }

    #[test]
    fn test_network_separates_blobs() {
        let (x, y) = blobs();
        let mut adapter = NeuralNetworkAdapter::new();
        let summary = adapter
            .train(
                &x,
                &y,
                &json!({
                    "epochs": 200,
                    "batch_size": 8,
                    "learning_rate": 0.05,
                    "hidden_layers": [8],
                    "random_state": 7
                }),
            )
            .unwrap();
        assert_eq!(summary.n_features, 2);
        assert_eq!(adapter.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let p: NeuralNetworkParams =
            serde_json::from_value(json!({ "epochs": 3, "optimizer": "sgd", "dropout": 0.2 })).unwrap();
        assert_eq!(p.epochs, 3);
        assert_eq!(p.hidden_layers, vec![16, 8]);
    }

    #[test]
    fn test_zero_width_layer_rejected() {
        let (x, y) = blobs();
        let mut adapter = NeuralNetworkAdapter::new();
        let err = adapter.train(&x, &y, &json!({ "hidden_layers": [4, 0] })).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParams { .. }));
    }

    #[test]
    fn test_wrong_width_at_predict() {
        let (x, y) = blobs();
        let net = FeedForwardNetwork::fit(
            &x,
            &y,
            &NeuralNetworkParams {
                epochs: 1,
                random_state: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        let err = net.predict_proba(&Array2::zeros((1, 3))).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeError { .. }));
    }

    #[test]
    fn test_load_rejects_mismatched_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.weights");
        let (x, y) = blobs();
        let params = NeuralNetworkParams {
            epochs: 1,
            random_state: Some(0),
            ..Default::default()
        };
        let net = FeedForwardNetwork::fit(&x, &y, &params).unwrap();
        assert!(net.validate().is_ok());

        let mut wide_input = net.clone();
        wide_input.mean = Array1::zeros(5);
        wide_input.scale = Array1::ones(5);
        write_bincode(&path, &wide_input).unwrap();
        let mut adapter = NeuralNetworkAdapter::new();
        assert!(matches!(adapter.load(&path), Err(PipelineError::ShapeError { .. })));

        let mut short_bias = net.clone();
        short_bias.biases[0] = Array1::zeros(1);
        write_bincode(&path, &short_bias).unwrap();
        assert!(adapter.load(&path).is_err());

        let mut no_output = net;
        no_output.weights.pop();
        no_output.biases.pop();
        write_bincode(&path, &no_output).unwrap();
        assert!(adapter.load(&path).is_err());
    }
}
