use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Raw matrix file: headerless little-endian f64, row-major
// ---------------------------------------------------------------------------

/// A dense row-major matrix as stored in a raw matrix file.
///
/// Labelled files carry the label in column 0. The shape lives only in the
/// file name (`<stem>_<rows>_<cols>`), never in the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatrix {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl RawMatrix {
    /// Build from row vectors. All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::DimensionMismatch {
                    expected: format!("{cols} columns"),
                    actual: format!("{} columns in row {i}", row.len()),
                });
            }
            values.extend_from_slice(row);
        }
        Ok(RawMatrix {
            rows: rows.len(),
            cols,
            values,
        })
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.cols..(i + 1) * self.cols]
    }

    /// Read a raw matrix file with a known column count.
    pub fn read(path: &Path, cols: usize) -> Result<Self> {
        if cols == 0 {
            return Err(Error::hyperparameter("cols", cols, "must be positive"));
        }
        let bytes = fs::read(path)?;
        if bytes.len() % 8 != 0 {
            return Err(Error::ShapeMismatch {
                path: path.to_path_buf(),
                values: bytes.len() / 8,
                cols,
            });
        }
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        if values.len() % cols != 0 {
            return Err(Error::ShapeMismatch {
                path: path.to_path_buf(),
                values: values.len(),
                cols,
            });
        }
        let rows = values.len() / cols;
        debug!("read {} ({rows} x {cols})", path.display());
        Ok(RawMatrix { rows, cols, values })
    }

    /// Read a raw matrix file whose shape is encoded in its name.
    pub fn read_with_dims(path: &Path) -> Result<Self> {
        let (rows, cols) = dims_from_file_name(path).ok_or_else(|| {
            Error::parse(
                path.display().to_string(),
                "file name does not end in _<rows>_<cols>",
            )
        })?;
        let matrix = Self::read(path, cols)?;
        if matrix.rows != rows {
            return Err(Error::DimensionMismatch {
                expected: format!("{rows} rows"),
                actual: format!("{} rows", matrix.rows),
            });
        }
        Ok(matrix)
    }

    /// Write the values verbatim.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, encode_f64(&self.values))?;
        debug!("wrote {} ({} x {})", path.display(), self.rows, self.cols);
        Ok(())
    }
}

/// Little-endian byte image of a slice of f64.
pub fn encode_f64(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// `<stem>_<rows>_<cols>`
pub fn raw_file_name(stem: &str, rows: usize, cols: usize) -> String {
    format!("{stem}_{rows}_{cols}")
}

/// Parse `(rows, cols)` from the two trailing `_`-separated integers.
pub fn dims_from_file_name(path: &Path) -> Option<(usize, usize)> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.rsplit('_');
    let cols = parts.next()?.parse().ok()?;
    let rows = parts.next()?.parse().ok()?;
    Some((rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let m = RawMatrix::from_rows(vec![vec![1.0, 0.5, -2.0], vec![0.0, 3.25, 1e-9]]).unwrap();
        let path = dir.path().join(raw_file_name("pair", m.rows, m.cols));
        m.write(&path).unwrap();

        let back = RawMatrix::read_with_dims(&path).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.row(1), &[0.0, 3.25, 1e-9]);
    }

    #[test]
    fn dims_come_from_trailing_fields() {
        let p = Path::new("/data/cats_vs_dogs_8000_2049");
        assert_eq!(dims_from_file_name(p), Some((8000, 2049)));
        let p = Path::new("train.csv_raw_10_5");
        assert_eq!(dims_from_file_name(p), Some((10, 5)));
        assert_eq!(dims_from_file_name(Path::new("model")), None);
        assert_eq!(dims_from_file_name(Path::new("a_b_3")), None);
    }

    #[test]
    fn ragged_buffer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged");
        fs::write(&path, encode_f64(&[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        let err = RawMatrix::read(&path, 2).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { values: 5, cols: 2, .. }));

        fs::write(&path, [0u8; 12]).unwrap();
        assert!(RawMatrix::read(&path, 1).is_err());
    }

    #[test]
    fn stated_rows_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m_3_2");
        fs::write(&path, encode_f64(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert!(matches!(
            RawMatrix::read_with_dims(&path),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn from_rows_rejects_mixed_lengths() {
        assert!(RawMatrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
