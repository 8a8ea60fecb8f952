//! Trainers.
//!
//! The row-major trainers ([`logreg`], [`sgd_classifier`], [`minibatch`])
//! work on [`Samples`](crate::data::Samples) with f64 weights. The
//! [`engine`] trains linear models on a
//! [`ColumnStore`](crate::data::ColumnStore) with f32 weights.

pub mod engine;
pub mod lbfgs;
pub mod logreg;
pub mod metrics;
pub mod minibatch;
pub mod sgd_classifier;

use crate::data::Samples;
use crate::error::Result;

/// σ(z) = 1 / (1 + e^(-z))
pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A binary classifier over row-major samples.
pub trait Classifier {
    fn fit(&mut self, samples: &Samples) -> Result<()>;

    /// Class-1 probability per row.
    fn predict_proba(&self, samples: &Samples) -> Vec<f64>;
}
