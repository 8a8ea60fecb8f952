use log::debug;

use super::lbfgs::{Lbfgs, Status};
use super::{dot, sigmoid, Classifier};
use crate::data::Samples;
use crate::error::{Error, Result};

/// L2-regularized logistic regression fitted with L-BFGS.
///
/// Minimizes `C · Σ logloss_i + ½‖w‖²`; the intercept is not penalized.
/// Every [`fit`](Classifier::fit) starts from the current weights, so repeated
/// fits with a small `max_iter` continue where the last one stopped.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    weights: Vec<f64>,
    intercept: f64,
    last_status: Option<Status>,
}

const HISTORY: usize = 10;

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(0.1, 10, 1e-3)
    }
}

/// `log(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize, tol: f64) -> Self {
        LogisticRegression {
            c,
            max_iter,
            tol,
            weights: Vec::new(),
            intercept: 0.0,
            last_status: None,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Whether the last fit reached the tolerance.
    pub fn converged(&self) -> bool {
        self.last_status == Some(Status::Converged)
    }

    /// Objective and gradient; `params` is `[w..., b]`.
    fn objective(&self, samples: &Samples, params: &[f64]) -> (f64, Vec<f64>) {
        let d = samples.num_features;
        let (w, b) = (&params[..d], params[d]);
        let mut value = 0.5 * dot(w, w);
        let mut grad: Vec<f64> = w.to_vec();
        grad.push(0.0);

        for i in 0..samples.len() {
            let row = samples.row(i);
            let z = dot(w, row) + b;
            let y = samples.y[i];
            // -[y log σ(z) + (1-y) log(1-σ(z))] = softplus(z) - y z
            value += self.c * (softplus(z) - y * z);
            let r = self.c * (sigmoid(z) - y);
            for (g, &x) in grad[..d].iter_mut().zip(row) {
                *g += r * x;
            }
            grad[d] += r;
        }
        (value, grad)
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, samples: &Samples) -> Result<()> {
        if samples.is_empty() {
            return Err(Error::EmptyDataset);
        }
        if self.c <= 0.0 {
            return Err(Error::hyperparameter("C", self.c, "must be positive"));
        }
        let d = samples.num_features;
        if self.weights.len() != d {
            self.weights = vec![0.0; d];
            self.intercept = 0.0;
        }

        let mut x0 = self.weights.clone();
        x0.push(self.intercept);
        let solver = Lbfgs::new(self.max_iter, self.tol, HISTORY);
        let m = solver.minimize(|p| self.objective(samples, p), x0);
        debug!(
            "lbfgs: {:?} after {} iterations, objective {:.6}",
            m.status, m.iterations, m.value
        );

        self.intercept = m.x[d];
        self.weights = m.x[..d].to_vec();
        self.last_status = Some(m.status);
        Ok(())
    }

    fn predict_proba(&self, samples: &Samples) -> Vec<f64> {
        (0..samples.len())
            .map(|i| {
                let row = samples.row(i);
                if self.weights.len() == row.len() {
                    sigmoid(dot(&self.weights, row) + self.intercept)
                } else {
                    sigmoid(self.intercept)
                }
            })
            .collect()
    }
}
