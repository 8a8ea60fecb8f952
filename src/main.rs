mod app;

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;

#[derive(Parser)]
#[command(name = "column-ml", version, about = "Cats-vs-dogs feature conversion and linear model training")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Turn `features<N>` dumps into a shuffled labelled raw matrix.
    ConvertFeatures(app::ConvertFeaturesArgs),
    /// Turn a CSV or Parquet table into a labelled raw matrix.
    ConvertTable(app::ConvertTableArgs),
    /// Full-batch L-BFGS logistic regression with a learning curve.
    Logreg(app::LogregArgs),
    /// Per-sample SGD logistic regression with an L1 penalty.
    Sgd(app::SgdArgs),
    /// Minibatch gradient descent logistic regression.
    Minibatch(app::MinibatchArgs),
    /// Column-store SGD / SCD training of linreg, logreg or l2svm.
    Train(app::TrainArgs),
    /// Logistic predictions from a stored model.
    Predict(app::PredictArgs),
    /// Generate the RTL simulation environment.
    AseEnv(app::AseEnvArgs),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::ConvertFeatures(args) => {
            app::convert_features(&args)?;
        }
        Command::ConvertTable(args) => {
            app::convert_table(&args)?;
        }
        Command::Logreg(args) => {
            app::logreg(&args)?;
        }
        Command::Sgd(args) => {
            app::sgd(&args)?;
        }
        Command::Minibatch(args) => {
            app::minibatch(&args)?;
        }
        Command::Train(args) => {
            app::train(&args)?;
        }
        Command::Predict(args) => {
            app::predict(&args)?;
        }
        Command::AseEnv(args) => {
            app::ase_env(&args)?;
        }
    }
    Ok(())
}
