use std::fmt;

use crate::data::raw::RawMatrix;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Samples – row-major training view used by the script trainers
// ---------------------------------------------------------------------------

/// Feature rows plus one label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    /// Number of feature columns in each row of `x`.
    pub num_features: usize,
    /// `len() * num_features` values, row-major.
    pub x: Vec<f64>,
    /// One label per row (0 or 1 for the classifiers).
    pub y: Vec<f64>,
}

impl Samples {
    /// Split a labelled raw matrix: column 0 is the label, the rest are features.
    pub fn from_labelled(raw: &RawMatrix) -> Result<Self> {
        if raw.cols < 2 {
            return Err(Error::DimensionMismatch {
                expected: "a label column and at least one feature".to_string(),
                actual: format!("{} columns", raw.cols),
            });
        }
        let num_features = raw.cols - 1;
        let mut x = Vec::with_capacity(raw.rows * num_features);
        let mut y = Vec::with_capacity(raw.rows);
        for i in 0..raw.rows {
            let row = raw.row(i);
            y.push(row[0]);
            x.extend_from_slice(&row[1..]);
        }
        Ok(Samples { num_features, x, y })
    }

    /// Every column is a feature; labels are set to zero.
    pub fn unlabelled(raw: &RawMatrix) -> Self {
        Samples {
            num_features: raw.cols,
            x: raw.values.clone(),
            y: vec![0.0; raw.rows],
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.x[i * self.num_features..(i + 1) * self.num_features]
    }

    /// Iterate over the values of feature column `j`.
    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.x.iter().skip(j).step_by(self.num_features).copied()
    }

    /// Copy with a constant 1.0 column prepended to every row.
    pub fn with_bias(&self) -> Samples {
        let d = self.num_features + 1;
        let mut x = Vec::with_capacity(self.len() * d);
        for i in 0..self.len() {
            x.push(1.0);
            x.extend_from_slice(self.row(i));
        }
        Samples {
            num_features: d,
            x,
            y: self.y.clone(),
        }
    }

    /// Copy of the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Samples {
        let mut x = Vec::with_capacity(indices.len() * self.num_features);
        let mut y = Vec::with_capacity(indices.len());
        for &i in indices {
            x.extend_from_slice(self.row(i));
            y.push(self.y[i]);
        }
        Samples {
            num_features: self.num_features,
            x,
            y,
        }
    }
}

/// Short preview used in log output: `[a, b, c, ... (n values)]`.
pub struct Preview<'a>(pub &'a [f64]);

impl fmt::Display for Preview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 6;
        write!(f, "[")?;
        for (k, v) in self.0.iter().take(SHOWN).enumerate() {
            if k > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:.4}")?;
        }
        if self.0.len() > SHOWN {
            write!(f, ", ... ({} values)", self.0.len())?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawMatrix {
        RawMatrix::from_rows(vec![
            vec![1.0, 10.0, 20.0],
            vec![0.0, 30.0, 40.0],
            vec![1.0, 50.0, 60.0],
        ])
        .unwrap()
    }

    #[test]
    fn label_column_is_split_off() {
        let s = Samples::from_labelled(&raw()).unwrap();
        assert_eq!(s.num_features, 2);
        assert_eq!(s.y, vec![1.0, 0.0, 1.0]);
        assert_eq!(s.row(2), &[50.0, 60.0]);
        assert_eq!(s.column(1).collect::<Vec<_>>(), vec![20.0, 40.0, 60.0]);
    }

    #[test]
    fn bias_is_prepended() {
        let s = Samples::from_labelled(&raw()).unwrap().with_bias();
        assert_eq!(s.num_features, 3);
        assert_eq!(s.row(1), &[1.0, 30.0, 40.0]);
    }

    #[test]
    fn select_reorders_rows() {
        let s = Samples::from_labelled(&raw()).unwrap().select(&[2, 0]);
        assert_eq!(s.y, vec![1.0, 1.0]);
        assert_eq!(s.row(0), &[50.0, 60.0]);
    }

    #[test]
    fn single_column_cannot_be_labelled() {
        let m = RawMatrix::from_rows(vec![vec![1.0]]).unwrap();
        assert!(Samples::from_labelled(&m).is_err());
        assert_eq!(Samples::unlabelled(&m).num_features, 1);
    }

    #[test]
    fn preview_truncates() {
        let v: Vec<f64> = (0..10).map(f64::from).collect();
        let s = Preview(&v).to_string();
        assert!(s.starts_with("[0.0000, 1.0000"));
        assert!(s.ends_with("(10 values)]"));
    }
}
