use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{accuracy, check_common, gradient_scale, loss, ModelType, SampleRange, TaskOptions, Training};
use crate::data::ColumnStore;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdParams {
    pub epochs: usize,
    pub minibatch_size: usize,
    pub step_size: f32,
    pub lambda: f32,
    /// When false, both terms of the update are divided by `epoch + 1`.
    pub constant_step_size: bool,
    /// Visit minibatches at random positions (with replacement) instead of in order.
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for SgdParams {
    fn default() -> Self {
        SgdParams {
            epochs: 10,
            minibatch_size: 16,
            step_size: 0.1,
            lambda: 0.0,
            constant_step_size: true,
            shuffle: false,
            seed: 42,
        }
    }
}

/// Minibatch SGD with an L1 subgradient.
///
/// Per minibatch: `x_j -= (η/B)·g_j + sign(x_j)·η·λ`, where `g` is the
/// gradient summed over the minibatch. The model starts at zero.
pub fn sgd(
    store: &ColumnStore,
    model_type: ModelType,
    params: &SgdParams,
    range: SampleRange,
    opts: &TaskOptions,
) -> Result<Training> {
    check_common(params.minibatch_size, params.step_size, params.lambda)?;
    range.check(store)?;
    let nmb = range.num_samples / params.minibatch_size;
    if nmb == 0 {
        return Err(Error::hyperparameter(
            "minibatch_size",
            params.minibatch_size,
            "must not exceed the number of training samples",
        ));
    }
    info!(
        "SGD {model_type:?}: {nmb} minibatches of {}, rest {}",
        params.minibatch_size,
        range.num_samples - nmb * params.minibatch_size
    );

    let nf = store.num_features;
    let mut x = vec![0.0f32; nf];
    let mut gradient = vec![0.0f32; nf];
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut training = Training::default();

    debug!("initial loss: {}", loss(store, model_type, &x, params.lambda, range, opts));

    let scaled_step = params.step_size / params.minibatch_size as f32;
    let scaled_lambda = params.step_size * params.lambda;

    for epoch in 0..params.epochs {
        let decay = if params.constant_step_size { 1.0 } else { (epoch + 1) as f32 };
        for k in 0..nmb {
            let m = if params.shuffle { rng.gen_range(0..nmb) } else { k };
            let first = range.first_sample + m * params.minibatch_size;
            for i in first..first + params.minibatch_size {
                let scale = gradient_scale(model_type, store.dot(&x, i), store.labels[i], opts);
                if scale != 0.0 {
                    for (g, col) in gradient.iter_mut().zip(&store.columns) {
                        *g += scale * col[i];
                    }
                }
            }
            for (xj, g) in x.iter_mut().zip(gradient.iter_mut()) {
                let regularizer = if *xj < 0.0 { -scaled_lambda } else { scaled_lambda };
                *xj -= (scaled_step * *g + regularizer) / decay;
                *g = 0.0;
            }
        }

        let l = loss(store, model_type, &x, params.lambda, range, opts);
        info!(
            "epoch {}: loss {l:.6}, {} / {} correct",
            epoch + 1,
            accuracy(store, model_type, &x, range, opts),
            range.num_samples
        );
        training.losses.push(l);
        training.history.push(x.clone());
    }

    training.model = x;
    Ok(training)
}
