//! Weighted L2-regularized logistic regression.
//!
//! Minimizes the sample-weighted log loss plus an L2 penalty scaled by `1/C`:
//!
//! ```text
//! L(w, b) = (1/W) Σ s_i ℓ(y_i, σ(w·x_i + b)) + ||w||² / (2 C W)
//! ```
//!
//! where `W = Σ s_i`. This is the usual `C · Σ s_i ℓ_i + ½||w||²` objective
//! divided by `C W`, so the minimizer is the same and the step size does not
//! depend on dataset size. The intercept is not penalized. Optimization is
//! full-batch Adam on the sparse design matrix.

use crate::data::FeatureMatrix;
use crate::error::{Result, SearchError};

#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Inverse regularization strength
    pub c: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Stop when the loss improves by less than this between iterations
    pub tol: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 400,
            learning_rate: 0.05,
            tol: 1e-7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Iterations actually run
    pub iterations: usize,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `n / (2 * n_class)` per class, indexed by label.
pub fn balanced_class_weights(labels: &[u8]) -> [f64; 2] {
    let n = labels.len() as f64;
    let n1 = labels.iter().filter(|&&y| y == 1).count() as f64;
    let n0 = n - n1;
    let w = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    [w(n0), w(n1)]
}

impl LogisticRegression {
    pub fn fit(
        x: &FeatureMatrix,
        labels: &[u8],
        sample_weight: &[f64],
        opts: &TrainOptions,
    ) -> Result<Self> {
        let n_pos = labels.iter().filter(|&&y| y == 1).count();
        if n_pos == 0 || n_pos == labels.len() {
            return Err(SearchError::DataInsufficient(format!(
                "training labels contain a single class ({} rows)",
                labels.len()
            )));
        }
        if x.len() != labels.len() || sample_weight.len() != labels.len() {
            return Err(SearchError::InvalidConfig(format!(
                "shape mismatch: {} rows, {} labels, {} weights",
                x.len(),
                labels.len(),
                sample_weight.len()
            )));
        }

        let total_weight: f64 = sample_weight.iter().sum();
        if !(total_weight > 0.0) {
            return Err(SearchError::DataInsufficient(
                "sample weights sum to zero".to_string(),
            ));
        }

        let d = x.n_features;
        let l2 = 1.0 / (opts.c * total_weight);
        let (beta1, beta2, eps) = (0.9, 0.999, 1e-8);

        let mut w = vec![0.0; d];
        let mut b = 0.0;
        let mut m = vec![0.0; d + 1];
        let mut v = vec![0.0; d + 1];
        let mut grad = vec![0.0; d + 1];
        let mut prev_loss = f64::INFINITY;
        let mut iterations = 0;

        for t in 1..=opts.max_iter {
            iterations = t;
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut loss = 0.0;

            for ((row, &y), &s) in x.rows.iter().zip(labels).zip(sample_weight) {
                if s == 0.0 {
                    continue;
                }
                let z = b + row.iter().map(|&(j, val)| w[j] * val).sum::<f64>();
                let p = sigmoid(z);
                let yf = f64::from(y);
                // log(1 + e^z) - y z, computed stably
                loss += s * (z.max(0.0) + (-z.abs()).exp().ln_1p() - yf * z);
                let r = s * (p - yf);
                for &(j, val) in row {
                    grad[j] += r * val;
                }
                grad[d] += r;
            }

            loss /= total_weight;
            for j in 0..d {
                grad[j] = grad[j] / total_weight + l2 * w[j];
                loss += 0.5 * l2 * w[j] * w[j];
            }
            grad[d] /= total_weight;

            let bc1 = 1.0 - f64::powi(beta1, t as i32);
            let bc2 = 1.0 - f64::powi(beta2, t as i32);
            for j in 0..=d {
                m[j] = beta1 * m[j] + (1.0 - beta1) * grad[j];
                v[j] = beta2 * v[j] + (1.0 - beta2) * grad[j] * grad[j];
                let step = opts.learning_rate * (m[j] / bc1) / ((v[j] / bc2).sqrt() + eps);
                if j == d {
                    b -= step;
                } else {
                    w[j] -= step;
                }
            }

            if (prev_loss - loss).abs() < opts.tol {
                break;
            }
            prev_loss = loss;
        }

        Ok(Self {
            weights: w,
            bias: b,
            iterations,
        })
    }

    /// Positive-class probability per row.
    pub fn predict_proba(&self, x: &FeatureMatrix) -> Vec<f64> {
        x.rows
            .iter()
            .map(|row| {
                let z = self.bias
                    + row
                        .iter()
                        .filter(|&&(j, _)| j < self.weights.len())
                        .map(|&(j, val)| self.weights[j] * val)
                        .sum::<f64>();
                sigmoid(z)
            })
            .collect()
    }
}
