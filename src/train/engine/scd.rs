use std::borrow::Cow;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{accuracy, check_common, loss, sigmoid, ModelType, SampleRange, TaskOptions, Training};
use crate::data::{ColumnStore, Storage};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScdParams {
    pub epochs: usize,
    pub minibatch_size: usize,
    pub step_size: f32,
    pub lambda: f32,
    /// Minibatches each private model sees per pass (`P`).
    pub minibatches_at_a_time: usize,
    /// Every `R` epochs one extra pass recomputes the residuals from the averaged model.
    pub residual_update_period: usize,
    pub storage: Storage,
    pub threads: usize,
}

impl Default for ScdParams {
    fn default() -> Self {
        ScdParams {
            epochs: 10,
            minibatch_size: 16,
            step_size: 0.1,
            lambda: 0.0,
            minibatches_at_a_time: 1,
            residual_update_period: 10000,
            storage: Storage::Plain,
            threads: 1,
        }
    }
}

/// A private model plus the residuals `r_i = x·a_i` of its minibatches.
struct Group {
    /// Absolute minibatch indices.
    minibatches: Vec<usize>,
    model: Vec<f32>,
    residual: Vec<f32>,
}

struct Pass<'a> {
    store: &'a ColumnStore,
    model_type: ModelType,
    minibatch_size: usize,
    storage: Storage,
    scaled_step: f32,
    scaled_lambda: f32,
}

fn soft_threshold(v: f32, threshold: f32) -> f32 {
    if v > threshold {
        v - threshold
    } else if v < -threshold {
        v + threshold
    } else {
        0.0
    }
}

impl Pass<'_> {
    fn blocks(&self, group: &Group, j: usize) -> Result<Vec<Cow<'_, [f32]>>> {
        group
            .minibatches
            .iter()
            .map(|&m| self.store.column_block(j, m, self.minibatch_size, self.storage))
            .collect()
    }

    fn step(&self, group: &mut Group) -> Result<()> {
        let b = self.minibatch_size;
        for j in 0..self.store.num_features {
            let blocks = self.blocks(group, j)?;

            let mut g = 0.0f32;
            for (l, block) in blocks.iter().enumerate() {
                let first = group.minibatches[l] * b;
                let residual = &group.residual[l * b..(l + 1) * b];
                for ((&a, &r), &y) in block.iter().zip(residual).zip(&self.store.labels[first..first + b]) {
                    let f = match self.model_type {
                        ModelType::Logreg => sigmoid(r),
                        _ => r,
                    };
                    g += (f - y) * a;
                }
            }

            let old = group.model[j];
            let new = soft_threshold(old - self.scaled_step * g, self.scaled_lambda);
            let change = new - old;
            group.model[j] = new;

            for (l, block) in blocks.iter().enumerate() {
                for (r, &a) in group.residual[l * b..(l + 1) * b].iter_mut().zip(block.iter()) {
                    *r += change * a;
                }
            }
        }
        Ok(())
    }

    fn refresh(&self, group: &mut Group, x_final: &[f32]) -> Result<()> {
        let b = self.minibatch_size;
        group.residual.fill(0.0);
        for (j, &w) in x_final.iter().enumerate() {
            let blocks = self.blocks(group, j)?;
            for (l, block) in blocks.iter().enumerate() {
                for (r, &a) in group.residual[l * b..(l + 1) * b].iter_mut().zip(block.iter()) {
                    *r += w * a;
                }
            }
        }
        Ok(())
    }
}

/// Stochastic coordinate descent over minibatch partitions.
///
/// The `nmb = n / B` minibatches of `range` are split into `G = nmb / P`
/// groups; group `k` holds minibatches `l·G + k` for `l < P` and owns a
/// private model. Each pass updates every coordinate of every group model
/// by a soft-thresholded gradient step; the epoch result is the mean of the
/// group models. Every `(pass + 1) % (R + 1) == 0` pass only recomputes the
/// residuals from that mean, so a run takes `epochs + epochs / R` passes.
///
/// Groups are independent, so `threads > 1` runs them on a rayon pool with
/// the same result as a sequential run.
pub fn scd(
    store: &ColumnStore,
    model_type: ModelType,
    params: &ScdParams,
    range: SampleRange,
    opts: &TaskOptions,
) -> Result<Training> {
    check_common(params.minibatch_size, params.step_size, params.lambda)?;
    range.check(store)?;
    if model_type == ModelType::L2svm {
        return Err(Error::hyperparameter("model", "l2svm", "not supported by SCD"));
    }
    if params.residual_update_period == 0 {
        return Err(Error::hyperparameter("residual_update_period", 0, "must be positive"));
    }
    let b = params.minibatch_size;
    if range.first_sample % b != 0 {
        return Err(Error::hyperparameter(
            "first_sample",
            range.first_sample,
            "must be a multiple of the minibatch size",
        ));
    }
    let nmb = range.num_samples / b;
    let p = params.minibatches_at_a_time;
    if p == 0 || p > nmb {
        return Err(Error::hyperparameter(
            "minibatches_at_a_time",
            p,
            "must be in 1..=number of minibatches",
        ));
    }
    let num_groups = nmb / p;
    let base = range.first_sample / b;
    info!(
        "SCD {model_type:?}: {nmb} minibatches of {b}, rest {}, {num_groups} groups of {p}, {:?} storage",
        range.num_samples - nmb * b,
        params.storage
    );

    let nf = store.num_features;
    let mut groups: Vec<Group> = (0..num_groups)
        .map(|k| Group {
            minibatches: (0..p).map(|l| base + l * num_groups + k).collect(),
            model: vec![0.0; nf],
            residual: vec![0.0; p * b],
        })
        .collect();

    let pool = if params.threads > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .build()
            .map_err(|e| Error::hyperparameter("threads", e, "could not build a thread pool"))?;
        Some(pool)
    } else {
        None
    };

    let pass = Pass {
        store,
        model_type,
        minibatch_size: b,
        storage: params.storage,
        scaled_step: params.step_size / b as f32,
        scaled_lambda: params.step_size * params.lambda,
    };

    let mut x_final = vec![0.0f32; nf];
    let mut training = Training::default();
    debug!("initial loss: {}", loss(store, model_type, &x_final, params.lambda, range, opts));

    let r = params.residual_update_period;
    let total_passes = params.epochs + params.epochs / r;
    for epoch in 0..total_passes {
        let refresh = (epoch + 1) % (r + 1) == 0;
        let run = |group: &mut Group| -> Result<()> {
            if refresh {
                pass.refresh(group, &x_final)
            } else {
                pass.step(group)
            }
        };
        match &pool {
            Some(pool) => pool.install(|| groups.par_iter_mut().try_for_each(run))?,
            None => groups.iter_mut().try_for_each(run)?,
        }

        if refresh {
            info!("pass {}: residuals refreshed", epoch + 1);
            continue;
        }

        x_final.fill(0.0);
        for group in &groups {
            for (xf, &xk) in x_final.iter_mut().zip(&group.model) {
                *xf += xk;
            }
        }
        for xf in &mut x_final {
            *xf /= num_groups as f32;
        }

        let l = loss(store, model_type, &x_final, params.lambda, range, opts);
        info!(
            "pass {}: loss {l:.6}, {} / {} correct",
            epoch + 1,
            accuracy(store, model_type, &x_final, range, opts),
            range.num_samples
        );
        training.losses.push(l);
        training.history.push(x_final.clone());
    }

    training.model = x_final;
    Ok(training)
}
