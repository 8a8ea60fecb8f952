use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::{NormType, Storage};
use crate::error::{Error, Result};
use crate::train::engine::{ModelType, ScdParams, SgdParams, TaskOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Sgd,
    Scd,
}

// ---------------------------------------------------------------------------
// EngineConfig – JSON description of a `train` run
// ---------------------------------------------------------------------------

/// Everything a `train` run needs besides its input data.
///
/// Every field has a default, so `{}` is a valid config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelType,
    pub algorithm: Algorithm,
    pub epochs: usize,
    pub minibatch_size: usize,
    pub step_size: f32,
    pub lambda: f32,
    pub constant_step_size: bool,
    pub shuffle: bool,
    pub minibatches_at_a_time: usize,
    pub residual_update_period: usize,
    pub storage: Storage,
    /// Fixed-point exponent for compressed storage.
    pub scaler: u32,
    pub threads: usize,
    /// Trailing fraction of the samples held out for testing.
    pub holdout: f64,
    pub normalization: NormType,
    pub seed: u64,
    /// Unset means [`TaskOptions::for_model`].
    pub task: Option<TaskOptions>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model: ModelType::Logreg,
            algorithm: Algorithm::Sgd,
            epochs: 10,
            minibatch_size: 16,
            step_size: 0.1,
            lambda: 0.0,
            constant_step_size: true,
            shuffle: false,
            minibatches_at_a_time: 1,
            residual_update_period: 10000,
            storage: Storage::Plain,
            scaler: 10,
            threads: 1,
            holdout: 0.0,
            normalization: NormType::ZeroToOne,
            seed: 42,
            task: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_json(&fs::read_to_string(path)?)?;
        debug!("loaded {}: {config:?}", path.display());
        Ok(config)
    }

    /// Checks that do not depend on the data size.
    pub fn validate(&self) -> Result<()> {
        if self.algorithm == Algorithm::Sgd && self.storage != Storage::Plain {
            return Err(Error::hyperparameter(
                "storage",
                format!("{:?}", self.storage),
                "SGD reads plain samples only",
            ));
        }
        if self.algorithm == Algorithm::Scd && self.model == ModelType::L2svm {
            return Err(Error::hyperparameter("model", "l2svm", "not supported by SCD"));
        }
        if !(0.0..1.0).contains(&self.holdout) {
            return Err(Error::hyperparameter("holdout", self.holdout, "must be in [0, 1)"));
        }
        if self.threads == 0 {
            return Err(Error::hyperparameter("threads", 0, "must be positive"));
        }
        Ok(())
    }

    pub fn task_options(&self) -> TaskOptions {
        self.task.unwrap_or_else(|| TaskOptions::for_model(self.model))
    }

    pub fn sgd_params(&self) -> SgdParams {
        SgdParams {
            epochs: self.epochs,
            minibatch_size: self.minibatch_size,
            step_size: self.step_size,
            lambda: self.lambda,
            constant_step_size: self.constant_step_size,
            shuffle: self.shuffle,
            seed: self.seed,
        }
    }

    pub fn scd_params(&self) -> ScdParams {
        ScdParams {
            epochs: self.epochs,
            minibatch_size: self.minibatch_size,
            step_size: self.step_size,
            lambda: self.lambda,
            minibatches_at_a_time: self.minibatches_at_a_time,
            residual_update_period: self.residual_update_period,
            storage: self.storage,
            threads: self.threads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn fields_and_nested_task_options_parse() {
        let cfg = EngineConfig::from_json(
            r#"{
                "model": "linreg",
                "algorithm": "scd",
                "storage": "compressed_encrypted",
                "minibatches_at_a_time": 4,
                "task": { "decision_boundary": 0.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.model, ModelType::Linreg);
        assert_eq!(cfg.storage, Storage::CompressedEncrypted);
        let task = cfg.task_options();
        assert_eq!(task.decision_boundary, 0.0);
        assert_eq!(task.cost_pos, 1.0);

        let scd = cfg.scd_params();
        assert_eq!(scd.minibatches_at_a_time, 4);
        assert_eq!(scd.epochs, 10);
    }

    #[test]
    fn l2svm_scores_against_minus_one_unless_configured() {
        let svm = EngineConfig::from_json(r#"{"model": "l2svm"}"#).unwrap();
        assert_eq!(svm.task_options().false_label, -1.0);
        assert_eq!(svm.task_options().decision_boundary, 0.0);

        let explicit = EngineConfig::from_json(r#"{"model": "l2svm", "task": {"decision_boundary": 0.25}}"#).unwrap();
        assert_eq!(explicit.task_options().decision_boundary, 0.25);
        assert_eq!(explicit.task_options().false_label, 0.0);

        assert_eq!(EngineConfig::default().task_options(), TaskOptions::default());
    }

    #[test]
    fn inconsistent_configs_are_rejected() {
        assert!(EngineConfig::from_json(r#"{"storage": "compressed"}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"algorithm": "scd", "model": "l2svm"}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"holdout": 1.5}"#).is_err());
        assert!(matches!(
            EngineConfig::from_json(r#"{"model": "svm"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"epochs": 3, "shuffle": true}"#).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.sgd_params().epochs, 3);
        assert!(cfg.sgd_params().shuffle);
    }
}
