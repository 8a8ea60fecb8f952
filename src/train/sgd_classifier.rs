use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{dot, sigmoid, Classifier};
use crate::data::Samples;
use crate::error::{Error, Result};

/// Per-sample SGD on the log loss with an L1 penalty.
///
/// The learning rate is constant. The L1 term uses cumulative truncation:
/// every update adds `eta * alpha` to a running budget `u`, and each weight
/// is pulled toward zero by whatever share of `u` it has not yet paid,
/// never crossing zero. The samples are expected to carry their own bias
/// column; there is no separate intercept.
#[derive(Debug, Clone)]
pub struct SgdClassifier {
    pub alpha: f64,
    pub eta0: f64,
    pub epochs: usize,
    pub seed: u64,
    weights: Vec<f64>,
}

impl Default for SgdClassifier {
    fn default() -> Self {
        SgdClassifier {
            alpha: 0.001,
            eta0: 0.001,
            epochs: 10,
            seed: 1,
            weights: Vec::new(),
        }
    }
}

/// Derivative of the log loss for a `±1` label and margin `p`.
fn dloss(p: f64, y: f64) -> f64 {
    let z = p * y;
    if z > 18.0 {
        -y * (-z).exp()
    } else if z < -18.0 {
        -y
    } else {
        -y / (z.exp() + 1.0)
    }
}

impl SgdClassifier {
    pub fn new(alpha: f64, eta0: f64, epochs: usize, seed: u64) -> Self {
        SgdClassifier {
            alpha,
            eta0,
            epochs,
            seed,
            weights: Vec::new(),
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn validate(&self) -> Result<()> {
        if self.eta0 <= 0.0 {
            return Err(Error::hyperparameter("eta0", self.eta0, "must be positive"));
        }
        if self.alpha < 0.0 {
            return Err(Error::hyperparameter("alpha", self.alpha, "must be non-negative"));
        }
        Ok(())
    }
}

impl Classifier for SgdClassifier {
    fn fit(&mut self, samples: &Samples) -> Result<()> {
        if samples.is_empty() {
            return Err(Error::EmptyDataset);
        }
        self.validate()?;

        let d = samples.num_features;
        let mut w = vec![0.0; d];
        let mut q = vec![0.0; d];
        let mut u = 0.0;
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for epoch in 0..self.epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                let x = samples.row(i);
                let y = if samples.y[i] == 1.0 { 1.0 } else { -1.0 };
                let g = dloss(dot(&w, x), y);
                for (wj, &xj) in w.iter_mut().zip(x) {
                    *wj -= self.eta0 * g * xj;
                }

                u += self.eta0 * self.alpha;
                for (wj, qj) in w.iter_mut().zip(q.iter_mut()) {
                    let before = *wj;
                    if *wj > 0.0 {
                        *wj = (*wj - (u + *qj)).max(0.0);
                    } else if *wj < 0.0 {
                        *wj = (*wj + (u - *qj)).min(0.0);
                    }
                    *qj += *wj - before;
                }
            }
            debug!("sgd epoch {}: |w|_1 = {:.6}", epoch + 1, w.iter().map(|v: &f64| v.abs()).sum::<f64>());
        }

        self.weights = w;
        Ok(())
    }

    fn predict_proba(&self, samples: &Samples) -> Vec<f64> {
        (0..samples.len())
            .map(|i| sigmoid(dot(&self.weights, samples.row(i))))
            .collect()
    }
}
