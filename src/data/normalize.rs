use serde::{Deserialize, Serialize};

use crate::data::model::Samples;

/// Target interval for min-max scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormType {
    ZeroToOne,
    MinusOneToOne,
}

/// Whether statistics are taken per feature column or per sample row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormDirection {
    Row,
    Column,
}

/// Per-feature minimum and range recorded by [`min_max_scale`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRanges {
    pub mins: Vec<f64>,
    pub ranges: Vec<f64>,
}

/// `(min, max - min)` of a sequence. An empty sequence never has a positive range.
pub fn extent<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let mut lo = f64::MAX;
    let mut hi = f64::MIN;
    for v in values {
        if v > hi {
            hi = v;
        }
        if v < lo {
            lo = v;
        }
    }
    (lo, hi - lo)
}

/// Map `v` from `[min, min + range]` into the interval of `norm`.
pub fn rescale(v: f64, min: f64, range: f64, norm: NormType) -> f64 {
    let unit = (v - min) / range;
    match norm {
        NormType::ZeroToOne => unit,
        NormType::MinusOneToOne => unit * 2.0 - 1.0,
    }
}

// ---------------------------------------------------------------------------
// Row-major scaling for the script trainers
// ---------------------------------------------------------------------------

/// Divide every feature column by its maximum (a zero maximum counts as 1).
///
/// Returns the divisors so a test matrix can be scaled the same way.
pub fn scale_by_max(samples: &mut Samples) -> Vec<f64> {
    let d = samples.num_features;
    let mut maxes = vec![f64::MIN; d];
    for row in samples.x.chunks_exact(d) {
        for (m, &v) in maxes.iter_mut().zip(row) {
            if v > *m {
                *m = v;
            }
        }
    }
    for m in &mut maxes {
        if *m == 0.0 || *m == f64::MIN {
            *m = 1.0;
        }
    }
    apply_max_scaling(&mut samples.x, &maxes);
    maxes
}

/// Divide each column of a row-major matrix by the matching divisor.
pub fn apply_max_scaling(x: &mut [f64], maxes: &[f64]) {
    for row in x.chunks_exact_mut(maxes.len()) {
        for (v, &m) in row.iter_mut().zip(maxes) {
            *v /= m;
        }
    }
}

/// Scale every feature column into `[0, 1]`. Constant columns are left alone.
pub fn min_max_scale(samples: &mut Samples) -> FeatureRanges {
    let d = samples.num_features;
    let mut ranges = FeatureRanges {
        mins: Vec::with_capacity(d),
        ranges: Vec::with_capacity(d),
    };
    for j in 0..d {
        let (min, range) = extent(samples.column(j));
        ranges.mins.push(min);
        ranges.ranges.push(range);
    }
    apply_min_max(&mut samples.x, &ranges);
    ranges
}

/// Apply recorded ranges to a row-major matrix with the same columns.
pub fn apply_min_max(x: &mut [f64], ranges: &FeatureRanges) {
    let d = ranges.mins.len();
    for row in x.chunks_exact_mut(d) {
        for ((v, &min), &range) in row.iter_mut().zip(&ranges.mins).zip(&ranges.ranges) {
            if range > 0.0 {
                *v = rescale(*v, min, range, NormType::ZeroToOne);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn samples() -> Samples {
        Samples {
            num_features: 3,
            x: vec![
                2.0, 5.0, 0.0, //
                4.0, 5.0, 0.0, //
                8.0, 5.0, 0.0,
            ],
            y: vec![0.0, 1.0, 1.0],
        }
    }

    #[test]
    fn max_scaling_keeps_zero_columns() {
        let mut s = samples();
        let maxes = scale_by_max(&mut s);
        assert_eq!(maxes, vec![8.0, 5.0, 1.0]);
        assert_eq!(s.row(0), &[0.25, 1.0, 0.0]);

        let mut test = vec![16.0, 10.0, 3.0];
        apply_max_scaling(&mut test, &maxes);
        assert_eq!(test, vec![2.0, 2.0, 3.0]);
    }

    #[test]
    fn min_max_leaves_constant_columns() {
        let mut s = samples();
        let r = min_max_scale(&mut s);
        assert_eq!(r.mins, vec![2.0, 5.0, 0.0]);
        assert_eq!(r.ranges, vec![6.0, 0.0, 0.0]);
        assert_relative_eq!(s.row(1)[0], 1.0 / 3.0);
        assert_eq!(s.row(2), &[1.0, 5.0, 0.0]);
        assert!(s.column(0).all(|v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn rescale_to_symmetric_interval() {
        assert_relative_eq!(rescale(3.0, 1.0, 4.0, NormType::MinusOneToOne), 0.0);
        assert_relative_eq!(rescale(5.0, 1.0, 4.0, NormType::MinusOneToOne), 1.0);
        assert_eq!(extent([3.0, -1.0, 2.0]), (-1.0, 4.0));
    }
}
