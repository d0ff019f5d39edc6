//! Shallow multilayer perceptron regressor (ReLU hidden layers, Adam).

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::ports::{check_training, check_width, EstimatorError, Regressor};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Layer {
    /// Row-major `n_in x n_out`.
    weights: Vec<f64>,
    bias: Vec<f64>,
    n_in: usize,
    n_out: usize,
}

impl Layer {
    fn glorot(n_in: usize, n_out: usize, rng: &mut ChaCha20Rng) -> Self {
        let bound = (6.0 / (n_in + n_out) as f64).sqrt();
        Self {
            weights: (0..n_in * n_out).map(|_| rng.gen_range(-bound..bound)).collect(),
            bias: (0..n_out).map(|_| rng.gen_range(-bound..bound)).collect(),
            n_in,
            n_out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedMlp {
    layers: Vec<Layer>,
    y_mean: f64,
    y_std: f64,
    n_features: usize,
}

/// Per-parameter Adam moments, shaped like the layers.
struct AdamState {
    m_w: Vec<Vec<f64>>,
    v_w: Vec<Vec<f64>>,
    m_b: Vec<Vec<f64>>,
    v_b: Vec<Vec<f64>>,
    t: i32,
}

impl AdamState {
    fn new(layers: &[Layer]) -> Self {
        let zeros_w = || layers.iter().map(|l| vec![0.0; l.weights.len()]).collect::<Vec<_>>();
        let zeros_b = || layers.iter().map(|l| vec![0.0; l.bias.len()]).collect::<Vec<_>>();
        Self {
            m_w: zeros_w(),
            v_w: zeros_w(),
            m_b: zeros_b(),
            v_b: zeros_b(),
            t: 0,
        }
    }
}

fn adam_step(params: &mut [f64], grads: &[f64], m: &mut [f64], v: &mut [f64], lr_t: f64) {
    for k in 0..params.len() {
        let g = grads[k];
        m[k] = BETA1 * m[k] + (1.0 - BETA1) * g;
        v[k] = BETA2 * v[k] + (1.0 - BETA2) * g * g;
        params[k] -= lr_t * m[k] / (v[k].sqrt() + ADAM_EPS);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpRegressor {
    hidden: Vec<usize>,
    learning_rate: f64,
    /// L2 penalty.
    alpha: f64,
    max_epochs: usize,
    batch_size: usize,
    tol: f64,
    patience: usize,
    seed: u64,
    fitted: Option<FittedMlp>,
}

impl MlpRegressor {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            hidden: vec![32, 16],
            learning_rate: 1e-3,
            alpha: 1e-4,
            max_epochs: 200,
            batch_size: 32,
            tol: 1e-4,
            patience: 10,
            seed,
            fitted: None,
        }
    }

    #[must_use]
    pub fn with_hidden(mut self, hidden: Vec<usize>, alpha: f64) -> Self {
        self.hidden = hidden;
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64, max_epochs: usize) -> Self {
        self.learning_rate = learning_rate;
        self.max_epochs = max_epochs.max(1);
        self
    }

    fn forward(layers: &[Layer], input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(layers.len() + 1);
        acts.push(input.to_vec());
        for (l, layer) in layers.iter().enumerate() {
            let prev = &acts[l];
            let mut out = layer.bias.clone();
            for (i, a) in prev.iter().enumerate() {
                if *a == 0.0 {
                    continue;
                }
                let row = &layer.weights[i * layer.n_out..(i + 1) * layer.n_out];
                for (o, w) in row.iter().enumerate() {
                    out[o] += a * w;
                }
            }
            if l + 1 < layers.len() {
                out.iter_mut().for_each(|v| *v = v.max(0.0));
            }
            acts.push(out);
        }
        acts
    }

    /// Accumulate gradients of `0.5 * (out - target)^2` for one sample.
    fn backward(
        layers: &[Layer],
        acts: &[Vec<f64>],
        target: f64,
        grad_w: &mut [Vec<f64>],
        grad_b: &mut [Vec<f64>],
    ) -> f64 {
        let output = acts[layers.len()][0];
        let err = output - target;
        let mut delta = vec![err];
        for l in (0..layers.len()).rev() {
            let layer = &layers[l];
            let a_prev = &acts[l];
            for (i, a) in a_prev.iter().enumerate() {
                for (o, d) in delta.iter().enumerate() {
                    grad_w[l][i * layer.n_out + o] += a * d;
                }
            }
            for (o, d) in delta.iter().enumerate() {
                grad_b[l][o] += d;
            }
            if l > 0 {
                delta = (0..layer.n_in)
                    .map(|i| {
                        if a_prev[i] <= 0.0 {
                            return 0.0;
                        }
                        let row = &layer.weights[i * layer.n_out..(i + 1) * layer.n_out];
                        row.iter().zip(&delta).map(|(w, d)| w * d).sum()
                    })
                    .collect();
            }
        }
        0.5 * err * err
    }
}

impl Regressor for MlpRegressor {
    fn name(&self) -> &str {
        "Neural Network"
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), EstimatorError> {
        check_training(x, y)?;
        self.fitted = None;

        let (n, d) = x.dim();
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);

        let y_mean = y.mean().unwrap_or(0.0);
        let y_std = {
            let var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n as f64;
            if var > 0.0 {
                var.sqrt()
            } else {
                1.0
            }
        };
        let targets: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();
        let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|r| r.to_vec()).collect();

        let mut sizes = vec![d];
        sizes.extend(self.hidden.iter().copied().filter(|&h| h > 0));
        sizes.push(1);
        let mut layers: Vec<Layer> = sizes
            .windows(2)
            .map(|w| Layer::glorot(w[0], w[1], &mut rng))
            .collect();

        let mut adam = AdamState::new(&layers);
        let mut order: Vec<usize> = (0..n).collect();
        let batch = self.batch_size.clamp(1, n);
        let mut best_loss = f64::INFINITY;
        let mut stale = 0;

        for epoch in 0..self.max_epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for chunk in order.chunks(batch) {
                let mut grad_w: Vec<Vec<f64>> =
                    layers.iter().map(|l| vec![0.0; l.weights.len()]).collect();
                let mut grad_b: Vec<Vec<f64>> =
                    layers.iter().map(|l| vec![0.0; l.bias.len()]).collect();
                for &i in chunk {
                    let acts = Self::forward(&layers, &rows[i]);
                    epoch_loss +=
                        Self::backward(&layers, &acts, targets[i], &mut grad_w, &mut grad_b);
                }

                let b = chunk.len() as f64;
                adam.t += 1;
                let lr_t = self.learning_rate * (1.0 - BETA2.powi(adam.t)).sqrt()
                    / (1.0 - BETA1.powi(adam.t));
                for (l, layer) in layers.iter_mut().enumerate() {
                    for (g, w) in grad_w[l].iter_mut().zip(&layer.weights) {
                        *g = *g / b + self.alpha * w / b;
                    }
                    grad_b[l].iter_mut().for_each(|g| *g /= b);
                    adam_step(
                        &mut layer.weights,
                        &grad_w[l],
                        &mut adam.m_w[l],
                        &mut adam.v_w[l],
                        lr_t,
                    );
                    adam_step(
                        &mut layer.bias,
                        &grad_b[l],
                        &mut adam.m_b[l],
                        &mut adam.v_b[l],
                        lr_t,
                    );
                }
            }

            let loss = epoch_loss / n as f64;
            if !loss.is_finite() {
                return Err(EstimatorError::Numerical(format!("loss diverged at epoch {epoch}")));
            }
            if loss > best_loss - self.tol {
                stale += 1;
                if stale >= self.patience {
                    tracing::debug!("MLP stopped early at epoch {epoch} (loss {loss:.5})");
                    break;
                }
            } else {
                stale = 0;
            }
            best_loss = best_loss.min(loss);
        }

        self.fitted = Some(FittedMlp {
            layers,
            y_mean,
            y_std,
            n_features: d,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        check_width(self.n_features(), x)?;
        let fitted = self.fitted.as_ref().ok_or(EstimatorError::NotFitted)?;
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                let acts = Self::forward(&fitted.layers, &row.to_vec());
                let out = acts.last().and_then(|a| a.first()).copied().unwrap_or(0.0);
                fitted.y_mean + fitted.y_std * out
            })
            .collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_features)
    }

    fn params(&self) -> String {
        format!(
            "hidden_layer_sizes={:?}, activation=relu, solver=adam, alpha={}, learning_rate={}",
            self.hidden, self.alpha, self.learning_rate
        )
    }

    fn to_bytes(&self) -> Result<Vec<u8>, EstimatorError> {
        bincode::serialize(self).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, EstimatorError> {
        bincode::deserialize(bytes).map_err(|e| EstimatorError::Serialization(e.to_string()))
    }

    fn tuning_grid(&self) -> Vec<Self> {
        let mut grid = Vec::new();
        for hidden in [vec![32, 16], vec![64, 32], vec![100]] {
            for alpha in [1e-4, 1e-3] {
                grid.push(Self::new(self.seed).with_hidden(hidden.clone(), alpha));
            }
        }
        grid
    }
}
