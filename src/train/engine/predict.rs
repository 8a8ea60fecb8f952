use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use super::sigmoid;
use crate::data::raw::encode_f64;
use crate::data::{ColumnStore, RawMatrix};
use crate::error::{Error, Result};

/// Write `σ(x · a_i)` for every sample of an unnormalized `test` store.
///
/// Column `j` is scaled with the training `mins[j]` and `ranges[j]` first;
/// columns whose training range is not positive (the bias among them) are
/// used as they are. Returns the number of lines written.
pub fn write_logreg_predictions(
    test: &ColumnStore,
    x: &[f32],
    mins: &[f32],
    ranges: &[f32],
    path: &Path,
) -> Result<usize> {
    let nf = test.num_features;
    if x.len() != nf || mins.len() != nf || ranges.len() != nf {
        return Err(Error::DimensionMismatch {
            expected: format!("{nf} features"),
            actual: format!("model {}, mins {}, ranges {}", x.len(), mins.len(), ranges.len()),
        });
    }

    let mut out = BufWriter::new(File::create(path)?);
    for i in 0..test.num_samples {
        let mut dot = 0.0f32;
        for (j, col) in test.columns.iter().enumerate() {
            let v = col[i];
            dot += if ranges[j] > 0.0 {
                x[j] * ((v - mins[j]) / ranges[j])
            } else {
                x[j] * v
            };
        }
        writeln!(out, "{}", sigmoid(dot))?;
    }
    out.flush()?;
    info!("wrote {} predictions to {}", test.num_samples, path.display());
    Ok(test.num_samples)
}

/// Store a model as a raw f64 vector.
pub fn write_model(path: &Path, x: &[f32]) -> Result<()> {
    let values: Vec<f64> = x.iter().map(|&v| f64::from(v)).collect();
    std::fs::write(path, encode_f64(&values))?;
    info!("wrote model ({} weights) to {}", x.len(), path.display());
    Ok(())
}

/// Read a model written by [`write_model`] (or any raw f64 vector).
pub fn load_model(path: &Path) -> Result<Vec<f32>> {
    let raw = RawMatrix::read(path, 1)?;
    if raw.values.is_empty() {
        return Err(Error::EmptyDataset);
    }
    Ok(raw.values.iter().map(|&v| v as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;

    #[test]
    fn model_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model");
        write_model(&path, &[0.5, -1.25, 3.0]).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 24);
        assert_eq!(load_model(&path).unwrap(), vec![0.5, -1.25, 3.0]);

        fs::write(&path, [0u8; 5]).unwrap();
        assert!(load_model(&path).is_err());
    }

    #[test]
    fn predictions_use_training_scaling() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawMatrix::from_rows(vec![vec![10.0, 7.0], vec![20.0, 7.0]]).unwrap();
        let test = ColumnStore::from_raw(&raw, false).unwrap();
        assert_eq!(test.num_features, 3);

        // bias range 0, feature 1 scaled from [10, 30], feature 2 has zero range
        let mins = [0.0, 10.0, 7.0];
        let ranges = [0.0, 20.0, 0.0];
        let x = [-1.0, 4.0, 0.0];
        let path = dir.path().join("predictions.txt");
        assert_eq!(write_logreg_predictions(&test, &x, &mins, &ranges, &path).unwrap(), 2);

        let lines: Vec<f32> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| l.parse().unwrap())
            .collect();
        assert_abs_diff_eq!(lines[0], sigmoid(-1.0), epsilon = 1e-6);
        assert_abs_diff_eq!(lines[1], sigmoid(1.0), epsilon = 1e-6);
    }

    #[test]
    fn mismatched_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawMatrix::from_rows(vec![vec![1.0]]).unwrap();
        let test = ColumnStore::from_raw(&raw, false).unwrap();
        let path = dir.path().join("p");
        assert!(write_logreg_predictions(&test, &[1.0], &[0.0; 2], &[0.0; 2], &path).is_err());
    }
}
