use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use column_ml::data::raw::raw_file_name;
use column_ml::data::{ColumnStore, NormType, RawMatrix};

/// Write a labelled synthetic raw matrix `syn_<rows>_<cols>`.
///
/// Labels are 0 or 1 with equal odds; every feature is the label times a
/// hidden per-feature weight plus a little uniform noise.
#[derive(Parser)]
#[command(name = "generate-synthetic", version)]
struct Args {
    #[arg(long)]
    rows: usize,
    #[arg(long)]
    features: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = ColumnStore::synthetic(args.rows, args.features, true, NormType::ZeroToOne, args.seed);
    let rows = (0..store.num_samples)
        .map(|i| {
            let mut row = Vec::with_capacity(store.num_features + 1);
            row.push(f64::from(store.labels[i]));
            row.extend(store.sample(i).into_iter().map(f64::from));
            row
        })
        .collect();
    let matrix = RawMatrix::from_rows(rows)?;

    let output_path = args.out_dir.join(raw_file_name("syn", matrix.rows, matrix.cols));
    matrix
        .write(&output_path)
        .with_context(|| format!("writing {}", output_path.display()))?;

    println!(
        "Wrote {} samples ({} features each) to {}",
        matrix.rows,
        args.features,
        output_path.display()
    );
    Ok(())
}
