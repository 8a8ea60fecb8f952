use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use column_ml::ase::AseEnvironment;
use column_ml::config::{Algorithm, EngineConfig};
use column_ml::data::encrypt::DEFAULT_KEY;
use column_ml::data::loader::{self, ClassSpec, DEFAULT_NUM_FEATURES};
use column_ml::data::model::Preview;
use column_ml::data::normalize::{apply_max_scaling, min_max_scale, scale_by_max};
use column_ml::data::raw::raw_file_name;
use column_ml::data::{ColumnStore, NormDirection, NormType, RawMatrix, Samples, Storage};
use column_ml::train::engine::{self, ModelType, SampleRange, Training};
use column_ml::train::logreg::LogisticRegression;
use column_ml::train::metrics::{learning_curve, linspace, log_loss};
use column_ml::train::minibatch::MinibatchTrainer;
use column_ml::train::sgd_classifier::SgdClassifier;
use column_ml::train::Classifier;

// ---------------------------------------------------------------------------
// Shared loading
// ---------------------------------------------------------------------------

/// Labelled raw matrix with `num_features + 1` columns, split into samples.
fn load_labelled(path: &Path, num_features: usize) -> Result<Samples> {
    let raw = RawMatrix::read(path, num_features + 1)
        .with_context(|| format!("reading training matrix {}", path.display()))?;
    info!("{}: {} samples, {} features", path.display(), raw.rows, num_features);
    let samples = Samples::from_labelled(&raw)?;
    Ok(samples)
}

fn log_rows(samples: &Samples, n: usize) {
    for i in 0..n.min(samples.len()) {
        debug!("x[{i}] = {} y = {}", Preview(samples.row(i)), samples.y[i]);
    }
}

fn write_lines(path: &Path, values: &[f64]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for v in values {
        writeln!(out, "{v}")?;
    }
    out.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// convert-features / convert-table
// ---------------------------------------------------------------------------

#[derive(Debug, Args)]
pub struct ConvertFeaturesArgs {
    /// Directory holding the `features<N>` dumps.
    #[arg(long)]
    pub features_dir: PathBuf,
    #[arg(long, default_value_t = DEFAULT_NUM_FEATURES)]
    pub num_features: usize,
    /// Class file and label as `N:LABEL`; replaces the default cat/dog classes.
    #[arg(long = "class", value_name = "N:LABEL")]
    pub classes: Vec<ClassSpec>,
    /// Seed for the row shuffle.
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn convert_features(args: &ConvertFeaturesArgs) -> Result<PathBuf> {
    let classes = if args.classes.is_empty() {
        loader::default_classes()
    } else {
        args.classes.clone()
    };
    let mut matrix = loader::load_feature_dumps(&args.features_dir, &classes, args.num_features)
        .with_context(|| format!("loading feature dumps from {}", args.features_dir.display()))?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    loader::shuffle_rows(&mut matrix, &mut rng);

    let out = args
        .features_dir
        .join(raw_file_name("cats_vs_dogs", matrix.rows, matrix.cols));
    matrix
        .write(&out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {} ({} x {})", out.display(), matrix.rows, matrix.cols);
    Ok(out)
}

#[derive(Debug, Args)]
pub struct ConvertTableArgs {
    /// `.csv`, `.parquet` or `.pq` table.
    #[arg(long)]
    pub file: PathBuf,
    /// Column holding the label; it is moved to column 0.
    #[arg(long, default_value_t = 0)]
    pub label_index: usize,
}

pub fn convert_table(args: &ConvertTableArgs) -> Result<PathBuf> {
    let matrix = loader::load_table(&args.file, args.label_index)
        .with_context(|| format!("loading table {}", args.file.display()))?;
    let stem = format!("{}_raw", args.file.display());
    let out = PathBuf::from(raw_file_name(&stem, matrix.rows, matrix.cols));
    matrix
        .write(&out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {} ({} x {})", out.display(), matrix.rows, matrix.cols);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Script trainers: logreg / sgd / minibatch
// ---------------------------------------------------------------------------

#[derive(Debug, Args)]
pub struct LogregArgs {
    #[arg(long)]
    pub train_file: PathBuf,
    /// Unlabelled matrix with `num_features` columns to predict.
    #[arg(long)]
    pub test_file: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_NUM_FEATURES)]
    pub num_features: usize,
    /// Number of warm-started fits.
    #[arg(long, default_value_t = 100)]
    pub epochs: usize,
    #[arg(long, default_value_t = 10)]
    pub max_iter: usize,
    /// Inverse regularization strength.
    #[arg(long, default_value_t = 0.1)]
    pub c: f64,
    #[arg(long, default_value_t = 1e-3)]
    pub tol: f64,
    #[arg(long, default_value_t = 3)]
    pub folds: usize,
    #[arg(long, default_value = "predictions.txt")]
    pub predictions: PathBuf,
}

/// Returns the final training log-loss.
pub fn logreg(args: &LogregArgs) -> Result<f64> {
    let mut samples = load_labelled(&args.train_file, args.num_features)?;
    let maxes = scale_by_max(&mut samples);
    log_rows(&samples, 5);

    let mut model = LogisticRegression::new(args.c, args.max_iter, args.tol);
    let mut loss = f64::NAN;
    for epoch in 0..args.epochs {
        model.fit(&samples)?;
        loss = log_loss(&samples.y, &model.predict_proba(&samples));
        info!("fit {epoch}: loss {loss:.6}, converged {}", model.converged());
    }
    println!("training loss: {loss:.6}");

    let curve = learning_curve(
        || LogisticRegression::new(args.c, args.max_iter, args.tol),
        &samples,
        args.folds,
        &linspace(0.1, 1.0, 5),
    )?;
    for point in &curve {
        info!(
            "learning curve: {} samples, train {:.4}, test {:.4}",
            point.train_size,
            point.mean_train(),
            point.mean_test()
        );
    }

    if let Some(test_file) = &args.test_file {
        let raw = RawMatrix::read(test_file, args.num_features)
            .with_context(|| format!("reading test matrix {}", test_file.display()))?;
        info!("{}: {} test samples", test_file.display(), raw.rows);
        let mut test = Samples::unlabelled(&raw);
        apply_max_scaling(&mut test.x, &maxes);
        let probs = model.predict_proba(&test);
        write_lines(&args.predictions, &probs)?;
        println!("wrote {} predictions to {}", probs.len(), args.predictions.display());
    }
    Ok(loss)
}

#[derive(Debug, Args)]
pub struct SgdArgs {
    #[arg(long)]
    pub train_file: PathBuf,
    #[arg(long, default_value_t = DEFAULT_NUM_FEATURES)]
    pub num_features: usize,
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,
    /// L1 strength.
    #[arg(long, default_value_t = 0.001)]
    pub alpha: f64,
    /// Constant learning rate.
    #[arg(long, default_value_t = 0.001)]
    pub eta0: f64,
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

pub fn sgd(args: &SgdArgs) -> Result<f64> {
    let mut samples = load_labelled(&args.train_file, args.num_features)?;
    min_max_scale(&mut samples);
    let samples = samples.with_bias();
    log_rows(&samples, 2);

    let mut model = SgdClassifier::new(args.alpha, args.eta0, args.epochs, args.seed);
    let start = Instant::now();
    model.fit(&samples)?;
    let elapsed = start.elapsed();
    let loss = log_loss(&samples.y, &model.predict_proba(&samples));
    println!("loss: {loss:.6} ({:.3}s)", elapsed.as_secs_f64());
    Ok(loss)
}

#[derive(Debug, Args)]
pub struct MinibatchArgs {
    #[arg(long)]
    pub train_file: PathBuf,
    #[arg(long, default_value_t = DEFAULT_NUM_FEATURES)]
    pub num_features: usize,
    #[arg(long, default_value_t = 512)]
    pub batch_size: usize,
    /// Defaults to `0.1 / batch_size`.
    #[arg(long)]
    pub learning_rate: Option<f64>,
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,
    #[arg(long, default_value_t = 0.0)]
    pub l1: f64,
    /// Write the weights as raw f64; `-` picks `model_<num_weights>`.
    #[arg(long)]
    pub model_out: Option<PathBuf>,
}

pub fn minibatch(args: &MinibatchArgs) -> Result<Vec<f64>> {
    let mut samples = load_labelled(&args.train_file, args.num_features)?;
    min_max_scale(&mut samples);
    let samples = samples.with_bias();
    log_rows(&samples, 2);

    let trainer = MinibatchTrainer {
        batch_size: args.batch_size,
        learning_rate: args.learning_rate.unwrap_or(0.1 / args.batch_size as f64),
        epochs: args.epochs,
        l1: args.l1,
    };
    let run = trainer.train(&samples)?;
    if let Some(last) = run.losses.last() {
        println!("loss: {last:.6}");
    }

    if let Some(out) = &args.model_out {
        let out = if out.as_os_str() == "-" {
            PathBuf::from(format!("model_{}", run.weights.len()))
        } else {
            out.clone()
        };
        let raw = RawMatrix {
            rows: run.weights.len(),
            cols: 1,
            values: run.weights.clone(),
        };
        raw.write(&out).with_context(|| format!("writing {}", out.display()))?;
        println!("wrote model to {}", out.display());
    }
    Ok(run.losses)
}

// ---------------------------------------------------------------------------
// train / predict – column-store engine
// ---------------------------------------------------------------------------

/// Config-file overrides; unset flags keep the file's (or default) values.
#[derive(Debug, Default, Args)]
pub struct EngineOverrides {
    #[arg(long, value_enum)]
    pub model: Option<ModelType>,
    #[arg(long, value_enum)]
    pub algorithm: Option<Algorithm>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub minibatch_size: Option<usize>,
    #[arg(long)]
    pub step_size: Option<f32>,
    #[arg(long)]
    pub lambda: Option<f32>,
    #[arg(long)]
    pub minibatches_at_a_time: Option<usize>,
    #[arg(long)]
    pub residual_update_period: Option<usize>,
    #[arg(long, value_enum)]
    pub storage: Option<Storage>,
    #[arg(long)]
    pub threads: Option<usize>,
    /// Trailing fraction of samples kept out of training.
    #[arg(long)]
    pub holdout: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub shuffle: bool,
}

impl EngineOverrides {
    pub fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.model {
            cfg.model = v;
        }
        if let Some(v) = self.algorithm {
            cfg.algorithm = v;
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.minibatch_size {
            cfg.minibatch_size = v;
        }
        if let Some(v) = self.step_size {
            cfg.step_size = v;
        }
        if let Some(v) = self.lambda {
            cfg.lambda = v;
        }
        if let Some(v) = self.minibatches_at_a_time {
            cfg.minibatches_at_a_time = v;
        }
        if let Some(v) = self.residual_update_period {
            cfg.residual_update_period = v;
        }
        if let Some(v) = self.storage {
            cfg.storage = v;
        }
        if let Some(v) = self.threads {
            cfg.threads = v;
        }
        if let Some(v) = self.holdout {
            cfg.holdout = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if self.shuffle {
            cfg.shuffle = true;
        }
    }
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["train_file", "libsvm", "synthetic"])))]
pub struct TrainArgs {
    /// Labelled raw matrix with `num_features + 1` columns.
    #[arg(long)]
    pub train_file: Option<PathBuf>,
    #[arg(long)]
    pub libsvm: Option<PathBuf>,
    /// Generate data instead of reading it.
    #[arg(long)]
    pub synthetic: bool,
    /// Samples to use (required for libsvm and synthetic data).
    #[arg(long)]
    pub num_samples: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_NUM_FEATURES)]
    pub num_features: usize,
    /// JSON engine config.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub overrides: EngineOverrides,
    /// Write a JSON report of the run.
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[arg(long)]
    pub model_out: Option<PathBuf>,
    /// Unlabelled raw matrix to predict (logreg only).
    #[arg(long)]
    pub test_file: Option<PathBuf>,
    #[arg(long, default_value = "predictions.txt")]
    pub predictions: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct TrainReport {
    pub config: EngineConfig,
    pub num_samples: usize,
    pub num_features: usize,
    pub train_samples: usize,
    pub losses: Vec<f32>,
    pub train_accuracy: f64,
    pub test_accuracy: Option<f64>,
    pub compression_rate: Option<f64>,
    pub seconds: f64,
}

fn load_store(args: &TrainArgs, cfg: &EngineConfig) -> Result<ColumnStore> {
    let store = if let Some(path) = &args.train_file {
        let raw = RawMatrix::read(path, args.num_features + 1)
            .with_context(|| format!("reading training matrix {}", path.display()))?;
        let store = ColumnStore::from_raw(&raw, true)?;
        match args.num_samples {
            Some(n) => store.slice(0, n)?,
            None => store,
        }
    } else if let Some(path) = &args.libsvm {
        let Some(n) = args.num_samples else {
            bail!("--num-samples is required with --libsvm");
        };
        ColumnStore::from_libsvm(path, n, args.num_features, true)
            .with_context(|| format!("reading libsvm file {}", path.display()))?
    } else {
        let Some(n) = args.num_samples else {
            bail!("--num-samples is required with --synthetic");
        };
        let labels_norm = match cfg.model {
            ModelType::L2svm => NormType::MinusOneToOne,
            _ => NormType::ZeroToOne,
        };
        ColumnStore::synthetic(n, args.num_features, cfg.model != ModelType::Linreg, labels_norm, cfg.seed)
    };
    Ok(store)
}

fn fraction(hits: usize, range: SampleRange) -> f64 {
    hits as f64 / range.num_samples as f64
}

pub fn train(args: &TrainArgs) -> Result<TrainReport> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    args.overrides.apply(&mut cfg);
    cfg.validate()?;
    let task = cfg.task_options();
    cfg.task = Some(task);
    if args.test_file.is_some() && cfg.model != ModelType::Logreg {
        bail!("predictions are only written for logreg models");
    }

    let mut store = load_store(args, &cfg)?;
    store.normalize_samples(cfg.normalization, NormDirection::Column);
    match cfg.model {
        ModelType::Logreg => store.normalize_labels(NormType::ZeroToOne, Some(1.0)),
        ModelType::L2svm => store.normalize_labels(NormType::MinusOneToOne, Some(1.0)),
        ModelType::Linreg => store.normalize_labels(cfg.normalization, None),
    }
    store.log_samples(2);

    let (train_range, test_range) = SampleRange::holdout(store.num_samples, cfg.holdout)?;
    let mut compression_rate = None;
    if matches!(cfg.storage, Storage::Compressed | Storage::CompressedEncrypted) {
        let rate = store.compress(cfg.minibatch_size, cfg.scaler)?;
        info!("compression rate {rate:.3}");
        compression_rate = Some(rate);
    }
    if matches!(cfg.storage, Storage::Encrypted | Storage::CompressedEncrypted) {
        store.encrypt(cfg.minibatch_size, cfg.storage == Storage::CompressedEncrypted, &DEFAULT_KEY)?;
    }

    let start = Instant::now();
    let Training { model, losses, .. } = match cfg.algorithm {
        Algorithm::Sgd => engine::sgd(&store, cfg.model, &cfg.sgd_params(), train_range, &task)?,
        Algorithm::Scd => engine::scd(&store, cfg.model, &cfg.scd_params(), train_range, &task)?,
    };
    let seconds = start.elapsed().as_secs_f64();

    let train_accuracy = fraction(engine::accuracy(&store, cfg.model, &model, train_range, &task), train_range);
    let test_accuracy = (test_range.num_samples > 0)
        .then(|| fraction(engine::accuracy(&store, cfg.model, &model, test_range, &task), test_range));
    println!("train accuracy: {train_accuracy:.4} ({seconds:.3}s)");
    if let Some(acc) = test_accuracy {
        println!("test accuracy: {acc:.4}");
    }

    if let Some(out) = &args.model_out {
        engine::write_model(out, &model).with_context(|| format!("writing model {}", out.display()))?;
    }
    if let Some(test_file) = &args.test_file {
        let raw = RawMatrix::read(test_file, args.num_features)
            .with_context(|| format!("reading test matrix {}", test_file.display()))?;
        let test = ColumnStore::from_raw(&raw, false)?;
        engine::write_logreg_predictions(&test, &model, &store.mins, &store.ranges, &args.predictions)?;
    }

    let report = TrainReport {
        num_samples: store.num_samples,
        num_features: store.num_features,
        train_samples: train_range.num_samples,
        losses,
        train_accuracy,
        test_accuracy,
        compression_rate,
        seconds,
        config: cfg,
    };
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    }
    Ok(report)
}

#[derive(Debug, Args)]
pub struct PredictArgs {
    /// Raw f64 model, bias weight first.
    #[arg(long)]
    pub model: PathBuf,
    /// Labelled matrix the model was trained on; only its scaling is used.
    #[arg(long)]
    pub train_file: PathBuf,
    /// Leading training rows the model saw, as passed to `train`.
    #[arg(long)]
    pub num_samples: Option<usize>,
    #[arg(long)]
    pub test_file: PathBuf,
    #[arg(long, default_value_t = DEFAULT_NUM_FEATURES)]
    pub num_features: usize,
    #[arg(long, default_value = "predictions.txt")]
    pub out: PathBuf,
}

pub fn predict(args: &PredictArgs) -> Result<usize> {
    let model = engine::load_model(&args.model).with_context(|| format!("loading model {}", args.model.display()))?;

    let raw = RawMatrix::read(&args.train_file, args.num_features + 1)
        .with_context(|| format!("reading training matrix {}", args.train_file.display()))?;
    let train = ColumnStore::from_raw(&raw, true)?;
    let mut train = match args.num_samples {
        Some(n) => train.slice(0, n)?,
        None => train,
    };
    train.normalize_samples(NormType::ZeroToOne, NormDirection::Column);

    let raw = RawMatrix::read(&args.test_file, args.num_features)
        .with_context(|| format!("reading test matrix {}", args.test_file.display()))?;
    let test = ColumnStore::from_raw(&raw, false)?;
    let n = engine::write_logreg_predictions(&test, &model, &train.mins, &train.ranges, &args.out)?;
    println!("wrote {n} predictions to {}", args.out.display());
    Ok(n)
}

// ---------------------------------------------------------------------------
// ase-env
// ---------------------------------------------------------------------------

#[derive(Debug, Args)]
pub struct AseEnvArgs {
    /// Absolute path to the RTL sources.
    #[arg(long)]
    pub rtl: PathBuf,
    /// SDK root; defaults to `$WORKDIR`.
    #[arg(long)]
    pub workdir: Option<PathBuf>,
}

pub fn ase_env(args: &AseEnvArgs) -> Result<()> {
    let env = AseEnvironment::from_env(&args.rtl, args.workdir.clone())?;
    println!("RTL paths: {}", env.rtl_paths().join(" "));
    env.run().context("generating the ASE environment")?;
    Ok(())
}
