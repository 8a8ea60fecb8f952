//! Linear models trained on a [`ColumnStore`].
//!
//! Two solvers share the loss and accuracy definitions here:
//! * [`sgd`] – minibatch stochastic gradient descent with an L1 subgradient
//! * [`scd`] – stochastic coordinate descent over minibatch partitions,
//!   optionally reading compressed and/or encrypted column blocks

pub mod predict;
pub mod scd;
pub mod sgd;

use serde::{Deserialize, Serialize};

use crate::data::ColumnStore;
use crate::error::{Error, Result};

pub use predict::{load_model, write_logreg_predictions, write_model};
pub use scd::{scd, ScdParams};
pub use sgd::{sgd, SgdParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Linreg,
    #[default]
    Logreg,
    L2svm,
}

/// Contiguous samples a solver trains on or a metric is taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub first_sample: usize,
    pub num_samples: usize,
}

impl SampleRange {
    pub fn all(store: &ColumnStore) -> Self {
        SampleRange {
            first_sample: 0,
            num_samples: store.num_samples,
        }
    }

    /// Split `0..n` into a leading training range and a trailing holdout.
    pub fn holdout(n: usize, test_fraction: f64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&test_fraction) {
            return Err(Error::hyperparameter("holdout", test_fraction, "must be in [0, 1)"));
        }
        let test = (n as f64 * test_fraction) as usize;
        let train = SampleRange {
            first_sample: 0,
            num_samples: n - test,
        };
        let holdout = SampleRange {
            first_sample: n - test,
            num_samples: test,
        };
        Ok((train, holdout))
    }

    pub fn end(&self) -> usize {
        self.first_sample + self.num_samples
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.first_sample..self.end()
    }

    pub(crate) fn check(&self, store: &ColumnStore) -> Result<()> {
        if self.end() > store.num_samples {
            return Err(Error::DimensionMismatch {
                expected: format!("samples {}..{}", self.first_sample, self.end()),
                actual: format!("{} samples", store.num_samples),
            });
        }
        if self.num_samples == 0 {
            return Err(Error::EmptyDataset);
        }
        Ok(())
    }
}

/// Per-task constants for l2svm costs and linreg/l2svm accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub cost_pos: f32,
    pub cost_neg: f32,
    pub decision_boundary: f32,
    pub true_label: f32,
    pub false_label: f32,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            cost_pos: 1.0,
            cost_neg: 1.0,
            decision_boundary: 0.5,
            true_label: 1.0,
            false_label: 0.0,
        }
    }
}

impl TaskOptions {
    /// Defaults matching the label encoding `train` uses for `model_type`:
    /// l2svm labels are `±1` and split at 0.
    pub fn for_model(model_type: ModelType) -> Self {
        match model_type {
            ModelType::L2svm => TaskOptions {
                decision_boundary: 0.0,
                false_label: -1.0,
                ..TaskOptions::default()
            },
            ModelType::Linreg | ModelType::Logreg => TaskOptions::default(),
        }
    }
}

/// Output of a solver run.
#[derive(Debug, Clone, Default)]
pub struct Training {
    pub model: Vec<f32>,
    /// Model after every counted epoch.
    pub history: Vec<Vec<f32>>,
    /// Loss over the training range after every counted epoch.
    pub losses: Vec<f32>,
}

pub(crate) fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

fn l1(x: &[f32], lambda: f32) -> f32 {
    lambda * x.iter().map(|v| v.abs()).sum::<f32>()
}

/// Training objective of `model_type` at `x` over `range`, L1 term included.
pub fn loss(
    store: &ColumnStore,
    model_type: ModelType,
    x: &[f32],
    lambda: f32,
    range: SampleRange,
    opts: &TaskOptions,
) -> f32 {
    let n = range.num_samples as f32;
    let data = match model_type {
        ModelType::Logreg => {
            let total: f32 = range
                .indices()
                .map(|i| {
                    let p = sigmoid(store.dot(x, i));
                    let y = store.labels[i];
                    let clamp = |v: f32| if v.is_infinite() { -f32::MAX } else { v };
                    y * clamp(p.ln()) + (1.0 - y) * clamp((1.0 - p).ln())
                })
                .sum();
            -total / n
        }
        ModelType::Linreg => {
            let total: f32 = range
                .indices()
                .map(|i| {
                    let e = store.dot(x, i) - store.labels[i];
                    e * e
                })
                .sum();
            total / (2.0 * n)
        }
        ModelType::L2svm => {
            let total: f32 = range
                .indices()
                .map(|i| {
                    let y = store.labels[i];
                    let margin = 1.0 - y * store.dot(x, i);
                    if margin > 0.0 {
                        let cost = if y > 0.0 { opts.cost_pos } else { opts.cost_neg };
                        cost * margin * margin
                    } else {
                        0.0
                    }
                })
                .sum();
            total / (2.0 * n)
        }
    };
    data + l1(x, lambda)
}

/// Number of correctly classified samples in `range`.
pub fn accuracy(store: &ColumnStore, model_type: ModelType, x: &[f32], range: SampleRange, opts: &TaskOptions) -> usize {
    range
        .indices()
        .filter(|&i| {
            let dot = store.dot(x, i);
            let y = store.labels[i];
            match model_type {
                ModelType::Logreg => {
                    let p = sigmoid(dot);
                    (p > 0.5 && y == 1.0) || (p < 0.5 && y == 0.0)
                }
                ModelType::Linreg | ModelType::L2svm => {
                    (dot > opts.decision_boundary && y == opts.true_label)
                        || (dot < opts.decision_boundary && y == opts.false_label)
                }
            }
        })
        .count()
}

/// Per-sample gradient contribution for SGD.
pub(crate) fn gradient_scale(model_type: ModelType, dot: f32, y: f32, opts: &TaskOptions) -> f32 {
    match model_type {
        ModelType::Logreg => sigmoid(dot) - y,
        ModelType::Linreg => dot - y,
        ModelType::L2svm => {
            if 1.0 - y * dot > 0.0 {
                let cost = if y > 0.0 { opts.cost_pos } else { opts.cost_neg };
                cost * (dot - y)
            } else {
                0.0
            }
        }
    }
}

pub(crate) fn check_common(minibatch_size: usize, step_size: f32, lambda: f32) -> Result<()> {
    if minibatch_size == 0 {
        return Err(Error::hyperparameter("minibatch_size", 0, "must be positive"));
    }
    if !(step_size > 0.0) {
        return Err(Error::hyperparameter("step_size", step_size, "must be positive"));
    }
    if lambda < 0.0 {
        return Err(Error::hyperparameter("lambda", lambda, "must be non-negative"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{NormDirection, NormType, RawMatrix};
    use approx::assert_abs_diff_eq;

    /// Biased store where label 1 iff feature > 0.5.
    pub(crate) fn separable_store(n: usize) -> ColumnStore {
        let rows = (0..n)
            .map(|i| {
                let t = ((i * 37) % n) as f64 / n as f64;
                vec![if t > 0.5 { 1.0 } else { 0.0 }, t, 1.0 - t * t]
            })
            .collect();
        let mut store = ColumnStore::from_raw(&RawMatrix::from_rows(rows).unwrap(), true).unwrap();
        store.normalize_samples(NormType::ZeroToOne, NormDirection::Column);
        store
    }

    #[test]
    fn losses_at_zero_model() {
        let store = separable_store(40);
        let range = SampleRange::all(&store);
        let opts = TaskOptions::default();
        let zero = vec![0.0; store.num_features];

        let lr = loss(&store, ModelType::Logreg, &zero, 0.0, range, &opts);
        assert_abs_diff_eq!(lr, 2f32.ln(), epsilon = 1e-5);

        let positives = store.labels.iter().filter(|&&y| y == 1.0).count() as f32;
        let lin = loss(&store, ModelType::Linreg, &zero, 0.0, range, &opts);
        assert_abs_diff_eq!(lin, positives / (2.0 * 40.0), epsilon = 1e-6);

        let with_l1 = loss(&store, ModelType::Linreg, &[1.0, -2.0, 0.0], 0.1, range, &opts);
        let without = loss(&store, ModelType::Linreg, &[1.0, -2.0, 0.0], 0.0, range, &opts);
        assert_abs_diff_eq!(with_l1 - without, 0.3, epsilon = 1e-5);
    }

    #[test]
    fn logreg_loss_stays_finite_when_saturated() {
        let store = separable_store(20);
        let positive = store.labels.iter().position(|&y| y == 1.0).unwrap();
        let range = SampleRange { first_sample: positive, num_samples: 1 };
        let l = loss(&store, ModelType::Logreg, &[-1e6, 0.0, 0.0], 0.0, range, &TaskOptions::default());
        assert_eq!(l, f32::MAX);
    }

    #[test]
    fn accuracy_uses_the_decision_rule() {
        let store = separable_store(40);
        let range = SampleRange::all(&store);
        let opts = TaskOptions::default();
        // dot = feature 1, already scaled to [0, 1]
        let model = [0.0, 1.0, 0.0];
        let hits = accuracy(&store, ModelType::Linreg, &model, range, &opts);
        assert!(hits >= 38);
        assert_eq!(accuracy(&store, ModelType::Logreg, &[0.0; 3], range, &opts), 0);
    }

    #[test]
    fn holdout_splits_the_tail() {
        let (train, test) = SampleRange::holdout(100, 0.2).unwrap();
        assert_eq!(train, SampleRange { first_sample: 0, num_samples: 80 });
        assert_eq!(test.indices(), 80..100);
        assert!(SampleRange::holdout(10, 1.0).is_err());
    }
}
