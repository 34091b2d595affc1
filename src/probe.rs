//! Linear probe training
//!
//! Multinomial logistic regression over frozen activations: `scores =
//! X·W + b` followed by a softmax. Trained with mini-batch Adam on the
//! mean cross-entropy plus an elastic penalty on `W` (never on `b`):
//! `λ1·Σ|W| + λ2·‖W‖₂`.

use ndarray::{Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProbeError, Result};
use crate::tensors::Tensors;

/// A trained linear classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProbe {
    /// Shape (n_neurons, n_labels)
    pub weights: Array2<f32>,
    /// Shape (n_labels,)
    pub bias: Array1<f32>,
}

impl LinearProbe {
    /// Zero-initialized probe
    pub fn zeros(n_neurons: usize, n_labels: usize) -> Self {
        Self {
            weights: Array2::zeros((n_neurons, n_labels)),
            bias: Array1::zeros(n_labels),
        }
    }

    pub fn n_neurons(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_labels(&self) -> usize {
        self.weights.ncols()
    }

    /// Class scores, shape (rows, n_labels)
    pub fn scores(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.n_neurons() {
            return Err(ProbeError::mismatch(format!(
                "probe expects {} neurons, got {}",
                self.n_neurons(),
                x.ncols()
            )));
        }
        Ok(x.dot(&self.weights) + &self.bias)
    }

    /// Arg-max label index per row
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Array1<usize>> {
        let scores = self.scores(x)?;
        Ok(scores.rows().into_iter().map(|row| argmax(row.iter())).collect())
    }
}

fn argmax<'a>(values: impl Iterator<Item = &'a f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Hyperparameters for probe training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub lambda_l1: f32,
    pub lambda_l2: f32,
    pub learning_rate: f32,
    /// Seed for weight init and batch shuffling
    pub seed: u64,
    /// Visit batches in a seeded random order each epoch
    pub shuffle: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 512,
            lambda_l1: 1e-5,
            lambda_l2: 1e-5,
            learning_rate: 1e-3,
            seed: 42,
            shuffle: true,
        }
    }
}

impl TrainConfig {
    /// Reject settings the optimizer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ProbeError::config("batch size must be positive"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ProbeError::config("learning rate must be positive"));
        }
        if self.lambda_l1 < 0.0 || self.lambda_l2 < 0.0 {
            return Err(ProbeError::config("regularization weights must be non-negative"));
        }
        Ok(())
    }
}

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// Adam moment estimates for one parameter array
struct Moments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    fn new(shape: D) -> Self {
        Self {
            m: Array::zeros(shape.clone()),
            v: Array::zeros(shape),
        }
    }

    fn step(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>, lr: f32, t: i32) {
        let c1 = 1.0 - BETA1.powi(t);
        let c2 = 1.0 - BETA2.powi(t);
        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr * (*m / c1) / ((*v / c2).sqrt() + EPSILON);
            });
    }
}

/// Trainer for linear probes
pub struct ProbeTrainer {
    config: TrainConfig,
}

impl ProbeTrainer {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Train a probe with `n_labels` output classes
    pub fn train(&self, tensors: &Tensors, n_labels: usize) -> Result<LinearProbe> {
        self.train_with_history(tensors, n_labels)
            .map(|(probe, _)| probe)
    }

    /// Train a probe, also returning the mean loss of every epoch
    pub fn train_with_history(
        &self,
        tensors: &Tensors,
        n_labels: usize,
    ) -> Result<(LinearProbe, Vec<f32>)> {
        self.config.validate()?;
        let (x, y) = (&tensors.x, &tensors.y);
        let (n_examples, n_neurons) = x.dim();
        if n_examples == 0 || n_neurons == 0 {
            return Err(ProbeError::mismatch(format!(
                "cannot train on an empty tensor of shape {:?}",
                x.dim()
            )));
        }
        if y.len() != n_examples {
            return Err(ProbeError::mismatch(format!(
                "{n_examples} rows but {} labels",
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&label| label >= n_labels) {
            return Err(ProbeError::mismatch(format!(
                "label index {bad} out of range for {n_labels} labels"
            )));
        }

        info!(
            "Training probe: {} samples, {} features, {} labels",
            n_examples, n_neurons, n_labels
        );

        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let bound = 1.0 / (n_neurons as f32).sqrt();
        let mut probe = LinearProbe {
            weights: Array2::from_shape_fn((n_neurons, n_labels), |_| {
                rng.gen_range(-bound..bound)
            }),
            bias: Array1::from_shape_fn(n_labels, |_| rng.gen_range(-bound..bound)),
        };
        let mut w_moments = Moments::new(probe.weights.raw_dim());
        let mut b_moments = Moments::new(probe.bias.raw_dim());

        let mut order: Vec<usize> = (0..n_examples).collect();
        let mut history = Vec::with_capacity(cfg.num_epochs);
        let mut step = 0;

        for epoch in 0..cfg.num_epochs {
            if cfg.shuffle {
                order.shuffle(&mut rng);
            }
            let mut epoch_loss = 0.0;
            let mut n_batches = 0;

            for batch in order.chunks(cfg.batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb: Vec<usize> = batch.iter().map(|&i| y[i]).collect();

                let (loss, grad_w, grad_b) = self.gradients(&probe, &xb, &yb);
                step += 1;
                w_moments.step(&mut probe.weights, &grad_w, cfg.learning_rate, step);
                b_moments.step(&mut probe.bias, &grad_b, cfg.learning_rate, step);

                epoch_loss += loss;
                n_batches += 1;
            }

            let mean_loss = epoch_loss / n_batches as f32;
            info!("Epoch [{}/{}], Loss: {:.4}", epoch + 1, cfg.num_epochs, mean_loss);
            history.push(mean_loss);
        }

        Ok((probe, history))
    }

    /// Penalized loss and its gradients for one batch
    fn gradients(
        &self,
        probe: &LinearProbe,
        xb: &Array2<f32>,
        yb: &[usize],
    ) -> (f32, Array2<f32>, Array1<f32>) {
        let n = yb.len() as f32;
        let mut probs = xb.dot(&probe.weights) + &probe.bias;
        softmax_rows(&mut probs);

        let mut cross_entropy = 0.0;
        for (mut row, &label) in probs.rows_mut().into_iter().zip(yb) {
            cross_entropy -= row[label].max(f32::MIN_POSITIVE).ln();
            row[label] -= 1.0;
        }
        // probs now holds d(loss)/d(scores) up to the 1/n factor
        probs /= n;

        let w = &probe.weights;
        let l1 = w.iter().map(|v| v.abs()).sum::<f32>();
        let l2 = w.iter().map(|v| v * v).sum::<f32>().sqrt();
        let loss = cross_entropy / n + self.config.lambda_l1 * l1 + self.config.lambda_l2 * l2;

        let mut grad_w = xb.t().dot(&probs);
        let (lambda_l1, lambda_l2) = (self.config.lambda_l1, self.config.lambda_l2);
        Zip::from(&mut grad_w).and(w).for_each(|g, &wv| {
            *g += lambda_l1 * sign(wv);
            if l2 > 0.0 {
                *g += lambda_l2 * wv / l2;
            }
        });
        let grad_b = probs.sum_axis(Axis(0));

        debug!("batch loss {:.5}", loss);
        (loss, grad_w, grad_b)
    }
}

impl Default for ProbeTrainer {
    fn default() -> Self {
        Self::new(TrainConfig::default())
    }
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Row-wise softmax with max subtraction
pub fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
}
