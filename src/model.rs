//! Pretrained GRU sequence model for per-customer value prediction
//!
//! Inference-only reimplementation of the trained network: stacked GRU layers
//! over the 22 monthly steps, temporal mean pooling, layer normalization, and
//! a small feed-forward head ending in one scalar. The exact operation order
//! matters for numeric compatibility with the exported weights; the dropout
//! positions of the trained graph are no-ops at inference and carry no
//! parameters, so they do not appear here.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::Deserialize;
use tracing::debug;

use crate::features::N_FEATURES;

#[derive(Debug, Deserialize)]
struct RawLinear {
    weight: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RawGruLayer {
    weight_ih: Vec<Vec<f64>>,
    weight_hh: Vec<Vec<f64>>,
    bias_ih: Vec<f64>,
    bias_hh: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLayerNorm {
    gamma: Vec<f64>,
    beta: Vec<f64>,
    #[serde(default = "default_eps")]
    eps: f64,
}

fn default_eps() -> f64 {
    1e-5
}

/// JSON export of the trained state dict
#[derive(Debug, Deserialize)]
struct RawGruWeights {
    input_size: usize,
    hidden_size: usize,
    layers: Vec<RawGruLayer>,
    layer_norm: RawLayerNorm,
    fc1: RawLinear,
    fc2: RawLinear,
    output: RawLinear,
}

fn matrix(rows: Vec<Vec<f64>>, n_rows: usize, n_cols: usize, name: &str) -> crate::Result<Array2<f64>> {
    if rows.len() != n_rows || rows.iter().any(|r| r.len() != n_cols) {
        bail!("{name}: expected a {n_rows}x{n_cols} weight matrix");
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_rows, n_cols), flat)?)
}

fn vector(values: Vec<f64>, len: usize, name: &str) -> crate::Result<Array1<f64>> {
    if values.len() != len {
        bail!("{name}: expected a length-{len} vector, got {}", values.len());
    }
    Ok(Array1::from_vec(values))
}

#[derive(Debug, Clone)]
struct Linear {
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl Linear {
    fn from_raw(raw: RawLinear, in_dim: usize, out_dim: usize, name: &str) -> crate::Result<Self> {
        Ok(Self {
            weight: matrix(raw.weight, out_dim, in_dim, name)?,
            bias: vector(raw.bias, out_dim, name)?,
        })
    }

    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        self.weight.dot(x) + &self.bias
    }
}

#[derive(Debug, Clone)]
struct LayerNorm {
    gamma: Array1<f64>,
    beta: Array1<f64>,
    eps: f64,
}

impl LayerNorm {
    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        let mean = x.mean().unwrap_or(0.0);
        let variance = x.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
        let denom = (variance + self.eps).sqrt();
        x.mapv(|v| (v - mean) / denom) * &self.gamma + &self.beta
    }
}

/// One stacked GRU layer, gate order r, z, n (PyTorch weight layout)
#[derive(Debug, Clone)]
struct GruLayer {
    weight_ih: Array2<f64>,
    weight_hh: Array2<f64>,
    bias_ih: Array1<f64>,
    bias_hh: Array1<f64>,
}

impl GruLayer {
    fn from_raw(raw: RawGruLayer, input: usize, hidden: usize, name: &str) -> crate::Result<Self> {
        Ok(Self {
            weight_ih: matrix(raw.weight_ih, 3 * hidden, input, name)?,
            weight_hh: matrix(raw.weight_hh, 3 * hidden, hidden, name)?,
            bias_ih: vector(raw.bias_ih, 3 * hidden, name)?,
            bias_hh: vector(raw.bias_hh, 3 * hidden, name)?,
        })
    }

    fn step(&self, x: &Array1<f64>, h: &Array1<f64>, hidden: usize) -> Array1<f64> {
        let gi = self.weight_ih.dot(x) + &self.bias_ih;
        let gh = self.weight_hh.dot(h) + &self.bias_hh;

        let mut next = Array1::<f64>::zeros(hidden);
        for j in 0..hidden {
            let r = sigmoid(gi[j] + gh[j]);
            let z = sigmoid(gi[hidden + j] + gh[hidden + j]);
            let n = (gi[2 * hidden + j] + r * gh[2 * hidden + j]).tanh();
            next[j] = (1.0 - z) * n + z * h[j];
        }
        next
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn relu(mut x: Array1<f64>) -> Array1<f64> {
    x.mapv_inplace(|v| v.max(0.0));
    x
}

/// The pretrained recurrent value predictor
#[derive(Debug, Clone)]
pub struct GruModel {
    input_size: usize,
    hidden_size: usize,
    layers: Vec<GruLayer>,
    layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    output: Linear,
}

impl GruModel {
    /// Load and shape-check an exported weight file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("cannot open model weight file {}", path.display()))?;
        let raw: RawGruWeights = serde_json::from_reader(file)
            .with_context(|| format!("invalid model weights in {}", path.display()))?;
        Self::from_raw(raw).with_context(|| format!("while loading {}", path.display()))
    }

    fn from_raw(raw: RawGruWeights) -> crate::Result<Self> {
        if raw.input_size != N_FEATURES {
            bail!(
                "model expects {} input features, this pipeline produces {}",
                raw.input_size,
                N_FEATURES
            );
        }
        if raw.layers.is_empty() {
            bail!("model must have at least one recurrent layer");
        }
        let hidden = raw.hidden_size;
        if hidden < 4 {
            bail!("hidden size {hidden} too small for the feed-forward head");
        }

        let mut layers = Vec::with_capacity(raw.layers.len());
        for (l, layer) in raw.layers.into_iter().enumerate() {
            let input = if l == 0 { raw.input_size } else { hidden };
            layers.push(GruLayer::from_raw(layer, input, hidden, &format!("gru layer {l}"))?);
        }

        let layer_norm = LayerNorm {
            gamma: vector(raw.layer_norm.gamma, hidden, "layer_norm.gamma")?,
            beta: vector(raw.layer_norm.beta, hidden, "layer_norm.beta")?,
            eps: raw.layer_norm.eps,
        };

        let model = Self {
            input_size: raw.input_size,
            hidden_size: hidden,
            fc1: Linear::from_raw(raw.fc1, hidden, hidden / 2, "fc1")?,
            fc2: Linear::from_raw(raw.fc2, hidden / 2, hidden / 4, "fc2")?,
            output: Linear::from_raw(raw.output, hidden / 4, 1, "output")?,
            layers,
            layer_norm,
        };
        debug!(
            hidden,
            layers = model.layers.len(),
            "loaded GRU model weights"
        );
        Ok(model)
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// One prediction per customer, in tensor row order
    pub fn predict(&self, tensor: &Array3<f64>) -> crate::Result<Vec<f64>> {
        let (customers, steps, features) = tensor.dim();
        if features != self.input_size {
            bail!(
                "tensor has {features} features per step, model expects {}",
                self.input_size
            );
        }
        if steps == 0 {
            bail!("cannot predict from zero-length sequences");
        }

        let mut predictions = Vec::with_capacity(customers);
        for i in 0..customers {
            let sequence = tensor.index_axis(Axis(0), i);
            predictions.push(self.forward_sequence(&sequence));
        }
        Ok(predictions)
    }

    /// recurrent layers -> temporal mean -> normalize -> fc1 -> relu -> fc2
    /// -> relu -> linear
    fn forward_sequence(&self, sequence: &ArrayView2<f64>) -> f64 {
        let steps = sequence.len_of(Axis(0));
        let mut hidden_steps: Vec<Array1<f64>> =
            (0..steps).map(|t| sequence.row(t).to_owned()).collect();

        for layer in &self.layers {
            let mut h = Array1::<f64>::zeros(self.hidden_size);
            for x in hidden_steps.iter_mut() {
                h = layer.step(x, &h, self.hidden_size);
                *x = h.clone();
            }
        }

        // temporal mean pooling over the top layer's per-step hidden vectors
        let mut context = Array1::<f64>::zeros(self.hidden_size);
        for h in &hidden_steps {
            context = context + h;
        }
        context /= steps as f64;

        let context = self.layer_norm.forward(&context);
        let x = relu(self.fc1.forward(&context));
        let x = relu(self.fc2.forward(&x));
        self.output.forward(&x)[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn zero_raw(hidden: usize, output_bias: f64) -> RawGruWeights {
        let layer = |input: usize| RawGruLayer {
            weight_ih: vec![vec![0.0; input]; 3 * hidden],
            weight_hh: vec![vec![0.0; hidden]; 3 * hidden],
            bias_ih: vec![0.0; 3 * hidden],
            bias_hh: vec![0.0; 3 * hidden],
        };
        RawGruWeights {
            input_size: N_FEATURES,
            hidden_size: hidden,
            layers: vec![layer(N_FEATURES), layer(hidden)],
            layer_norm: RawLayerNorm {
                gamma: vec![1.0; hidden],
                beta: vec![0.0; hidden],
                eps: 1e-5,
            },
            fc1: RawLinear {
                weight: vec![vec![0.0; hidden]; hidden / 2],
                bias: vec![0.0; hidden / 2],
            },
            fc2: RawLinear {
                weight: vec![vec![0.0; hidden / 2]; hidden / 4],
                bias: vec![0.0; hidden / 4],
            },
            output: RawLinear {
                weight: vec![vec![0.0; hidden / 4]; 1],
                bias: vec![output_bias],
            },
        }
    }

    #[test]
    fn test_zero_weights_predict_output_bias() {
        // With all weights zero the head reduces to its output bias, which
        // exercises the full pooling/normalization/head wiring.
        let model = GruModel::from_raw(zero_raw(16, 2.5)).unwrap();
        let tensor = Array3::from_elem((3, 22, N_FEATURES), 1.0);
        let predictions = model.predict(&tensor).unwrap();
        assert_eq!(predictions.len(), 3);
        for p in predictions {
            assert!((p - 2.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_prediction_order_matches_rows() {
        // An active customer must come out different from an all-zero one,
        // and predictions must line up with tensor rows.
        let mut raw = zero_raw(16, 0.0);
        // layer 0 candidate gate reads the spend feature with a distinct
        // weight per hidden dimension, so the context vector is not constant
        for (j, row) in raw.layers[0].weight_ih.iter_mut().enumerate().skip(32) {
            row[0] = 0.05 * ((j - 32) as f64 + 1.0);
        }
        // layer 1 candidate gate passes its input through
        for (j, row) in raw.layers[1].weight_ih.iter_mut().enumerate().skip(32) {
            row[j - 32] = 1.0;
        }
        // head reads the largest hidden dimension, which normalizes positive
        for row in raw.fc1.weight.iter_mut() {
            row[15] = 1.0;
        }
        for (i, row) in raw.fc2.weight.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        raw.output.weight[0] = vec![1.0; 4];
        let model = GruModel::from_raw(raw).unwrap();

        let mut tensor = Array3::zeros((2, 22, N_FEATURES));
        for t in 0..22 {
            tensor[[1, t, 0]] = 0.2;
        }
        let predictions = model.predict(&tensor).unwrap();
        assert_eq!(predictions.len(), 2);
        assert!((predictions[0]).abs() < 1e-9);
        assert!(predictions[1] > predictions[0]);
    }

    #[test]
    fn test_shape_validation() {
        let mut raw = zero_raw(16, 0.0);
        raw.fc1.bias.pop();
        assert!(GruModel::from_raw(raw).is_err());

        let mut raw = zero_raw(16, 0.0);
        raw.layers[0].weight_ih[0].push(0.0);
        assert!(GruModel::from_raw(raw).is_err());
    }

    #[test]
    fn test_feature_count_mismatch_rejected() {
        let model = GruModel::from_raw(zero_raw(16, 0.0)).unwrap();
        let tensor = Array3::zeros((1, 22, 5));
        assert!(model.predict(&tensor).is_err());
    }

    #[test]
    fn test_missing_weight_file_is_fatal() {
        assert!(GruModel::load("/nonexistent/gru_weights.json").is_err());
    }
}
