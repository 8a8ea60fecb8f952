use log::info;

use super::metrics::log_loss;
use super::{dot, sigmoid};
use crate::data::Samples;
use crate::error::{Error, Result};

/// Full-gradient logistic regression over contiguous minibatches.
///
/// Each step uses `grad = X_bᵀ(σ(X_b w) − y_b) / batch`, plus `l1 · sign(w)`
/// when `l1 > 0`. A trailing partial batch is skipped.
#[derive(Debug, Clone)]
pub struct MinibatchTrainer {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub l1: f64,
}

impl Default for MinibatchTrainer {
    fn default() -> Self {
        MinibatchTrainer {
            batch_size: 512,
            learning_rate: 0.1 / 512.0,
            epochs: 10,
            l1: 0.0,
        }
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct MinibatchRun {
    pub weights: Vec<f64>,
    /// Training log-loss before the first epoch and after each epoch.
    pub losses: Vec<f64>,
}

impl MinibatchTrainer {
    pub fn loss(&self, samples: &Samples, w: &[f64]) -> f64 {
        let p: Vec<f64> = (0..samples.len())
            .map(|i| sigmoid(dot(w, samples.row(i))))
            .collect();
        let l1 = if self.l1 > 0.0 {
            self.l1 * w.iter().map(|v| v.abs()).sum::<f64>()
        } else {
            0.0
        };
        log_loss(&samples.y, &p) + l1
    }

    pub fn train(&self, samples: &Samples) -> Result<MinibatchRun> {
        if self.batch_size == 0 {
            return Err(Error::hyperparameter("batch_size", 0, "must be positive"));
        }
        let batches = samples.len() / self.batch_size;
        if batches == 0 {
            return Err(Error::hyperparameter(
                "batch_size",
                self.batch_size,
                "must not exceed the number of samples",
            ));
        }

        let d = samples.num_features;
        let mut w = vec![0.0; d];
        let mut losses = Vec::with_capacity(self.epochs + 1);
        let initial = self.loss(samples, &w);
        info!("initial loss: {initial:.6}");
        losses.push(initial);

        let mut grad = vec![0.0; d];
        for epoch in 0..self.epochs {
            for b in 0..batches {
                grad.fill(0.0);
                for i in b * self.batch_size..(b + 1) * self.batch_size {
                    let x = samples.row(i);
                    let r = sigmoid(dot(&w, x)) - samples.y[i];
                    for (g, &xj) in grad.iter_mut().zip(x) {
                        *g += r * xj;
                    }
                }
                for (wj, g) in w.iter_mut().zip(&grad) {
                    let mut step = g / self.batch_size as f64;
                    if self.l1 > 0.0 {
                        step += self.l1 * sign(*wj);
                    }
                    *wj -= self.learning_rate * step;
                }
            }
            let loss = self.loss(samples, &w);
            info!("epoch {}: loss {loss:.6}", epoch + 1);
            losses.push(loss);
        }
        Ok(MinibatchRun { weights: w, losses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize) -> Samples {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let t = (i % 10) as f64 / 10.0;
            x.extend_from_slice(&[1.0, t]);
            y.push(if t >= 0.5 { 1.0 } else { 0.0 });
        }
        Samples { num_features: 2, x, y }
    }

    #[test]
    fn loss_decreases_from_zero_weights() {
        let s = data(105);
        let trainer = MinibatchTrainer {
            batch_size: 10,
            learning_rate: 1.0,
            epochs: 30,
            l1: 0.0,
        };
        let run = trainer.train(&s).unwrap();
        assert_eq!(run.losses.len(), 31);
        assert!((run.losses[0] - 2f64.ln()).abs() < 1e-12);
        assert!(run.losses[30] < run.losses[0]);
        assert!(run.weights[1] > 0.0);
    }

    #[test]
    fn l1_shrinks_weights() {
        let s = data(100);
        let plain = MinibatchTrainer { batch_size: 10, learning_rate: 1.0, epochs: 5, l1: 0.0 };
        let sparse = MinibatchTrainer { l1: 0.05, ..plain.clone() };
        let a = plain.train(&s).unwrap();
        let b = sparse.train(&s).unwrap();
        let norm = |w: &[f64]| w.iter().map(|v| v.abs()).sum::<f64>();
        assert!(norm(&b.weights) < norm(&a.weights));
    }

    #[test]
    fn batch_larger_than_data_is_rejected() {
        let s = data(5);
        assert!(MinibatchTrainer::default().train(&s).is_err());
    }
}
