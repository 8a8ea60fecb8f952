use log::debug;
use serde::Serialize;

use super::Classifier;
use crate::data::Samples;
use crate::error::{Error, Result};

const EPS: f64 = 1e-15;

/// Mean binary cross-entropy with probabilities clipped to `[eps, 1 - eps]`.
pub fn log_loss(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .zip(p)
        .map(|(&y, &p)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / y.len() as f64
}

/// Fraction of rows where `p >= 0.5` agrees with `y == 1`.
pub fn accuracy(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let correct = y
        .iter()
        .zip(p)
        .filter(|&(&y, &p)| (p >= 0.5) == (y == 1.0))
        .count();
    correct as f64 / y.len() as f64
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Stratified K-fold split: `(train, test)` index lists per fold.
///
/// Classes are numbered by first appearance. Fold `f` takes, from the labels
/// sorted by class, every `k`-th one starting at `f`; each class then hands its
/// rows out in index order, the first fold's share first. Every fold keeps
/// close to the overall class ratio and index lists stay sorted.
pub fn stratified_k_fold(y: &[f64], k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    let n = y.len();
    if k < 2 || k > n {
        return Err(Error::hyperparameter("folds", k, "must be in 2..=number of samples"));
    }

    let mut classes: Vec<f64> = Vec::new();
    let encoded: Vec<usize> = y
        .iter()
        .map(|&label| match classes.iter().position(|&c| c == label) {
            Some(c) => c,
            None => {
                classes.push(label);
                classes.len() - 1
            }
        })
        .collect();

    let mut sorted = encoded.clone();
    sorted.sort_unstable();
    let mut allocation = vec![vec![0usize; classes.len()]; k];
    for (pos, &c) in sorted.iter().enumerate() {
        allocation[pos % k][c] += 1;
    }

    let mut test_fold = vec![0usize; n];
    for c in 0..classes.len() {
        let mut fold = 0;
        let mut left = allocation[0][c];
        for (i, _) in encoded.iter().enumerate().filter(|&(_, &e)| e == c) {
            while left == 0 {
                fold += 1;
                left = allocation[fold][c];
            }
            test_fold[i] = fold;
            left -= 1;
        }
    }

    Ok((0..k)
        .map(|f| {
            let (test, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| test_fold[i] == f);
            (train, test)
        })
        .collect())
}

/// Scores of one training size across all folds.
#[derive(Debug, Clone, Serialize)]
pub struct CurvePoint {
    pub train_size: usize,
    pub train_scores: Vec<f64>,
    pub test_scores: Vec<f64>,
}

impl CurvePoint {
    pub fn mean_train(&self) -> f64 {
        mean(&self.train_scores)
    }

    pub fn mean_test(&self) -> f64 {
        mean(&self.test_scores)
    }
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

/// Accuracy of a fresh model trained on growing prefixes of each fold's
/// training rows.
///
/// `fractions` are relative to the fold training size; each absolute size is
/// floored and at least 1.
pub fn learning_curve<C, F>(
    make: F,
    samples: &Samples,
    folds: usize,
    fractions: &[f64],
) -> Result<Vec<CurvePoint>>
where
    C: Classifier,
    F: Fn() -> C,
{
    let splits = stratified_k_fold(&samples.y, folds)?;
    let max_train = splits.iter().map(|(tr, _)| tr.len()).min().unwrap_or(0);

    let mut sizes: Vec<usize> = fractions
        .iter()
        .map(|&f| ((f * max_train as f64) as usize).clamp(1, max_train))
        .collect();
    sizes.dedup();

    let mut points = Vec::with_capacity(sizes.len());
    for &size in &sizes {
        let mut point = CurvePoint {
            train_size: size,
            train_scores: Vec::with_capacity(folds),
            test_scores: Vec::with_capacity(folds),
        };
        for (train_idx, test_idx) in &splits {
            let train = samples.select(&train_idx[..size]);
            let test = samples.select(test_idx);
            let mut model = make();
            model.fit(&train)?;
            point.train_scores.push(accuracy(&train.y, &model.predict_proba(&train)));
            point.test_scores.push(accuracy(&test.y, &model.predict_proba(&test)));
        }
        debug!(
            "learning curve: {size} rows, train {:.4}, test {:.4}",
            point.mean_train(),
            point.mean_test()
        );
        points.push(point);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn log_loss_clips_certain_mistakes() {
        assert_relative_eq!(log_loss(&[1.0, 0.0], &[0.5, 0.5]), 2f64.ln());
        let worst = log_loss(&[1.0], &[0.0]);
        assert!(worst.is_finite());
        assert_relative_eq!(worst, -(EPS.ln()), max_relative = 1e-9);
        assert_eq!(log_loss(&[], &[]), 0.0);
    }

    #[test]
    fn accuracy_thresholds_at_one_half() {
        let y = [1.0, 0.0, 1.0, 0.0];
        let p = [0.5, 0.49, 0.1, 0.9];
        assert_relative_eq!(accuracy(&y, &p), 0.5);
    }

    #[test]
    fn linspace_endpoints() {
        let v = linspace(0.1, 1.0, 5);
        assert_eq!(v.len(), 5);
        assert_relative_eq!(v[0], 0.1);
        assert_relative_eq!(v[2], 0.55);
        assert_relative_eq!(v[4], 1.0);
    }

    #[test]
    fn folds_keep_the_class_ratio() {
        let y = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let folds = stratified_k_fold(&y, 2).unwrap();
        assert_eq!(folds[0].1, vec![0, 1, 4, 5, 6]);
        assert_eq!(folds[1].1, vec![2, 3, 7, 8, 9]);
        assert_eq!(folds[0].0, vec![2, 3, 7, 8, 9]);
        assert!(stratified_k_fold(&y[..1], 2).is_err());
    }

    #[test]
    fn sorted_labels_still_spread_over_every_fold() {
        let y: Vec<f64> = (0..30).map(|i| if i < 10 { 1.0 } else { 0.0 }).collect();
        let folds = stratified_k_fold(&y, 3).unwrap();
        let mut seen = vec![0; 30];
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), 30);
            let positives = test.iter().filter(|&&i| y[i] == 1.0).count();
            assert!((3..=4).contains(&positives), "{positives} positives in {test:?}");
            for &i in test {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    struct Threshold {
        cut: f64,
    }

    impl Classifier for Threshold {
        fn fit(&mut self, s: &Samples) -> Result<()> {
            self.cut = s.x.iter().sum::<f64>() / s.len() as f64;
            Ok(())
        }

        fn predict_proba(&self, s: &Samples) -> Vec<f64> {
            s.x.iter().map(|&v| if v > self.cut { 1.0 } else { 0.0 }).collect()
        }
    }

    #[test]
    fn learning_curve_scores_every_fold() {
        let x: Vec<f64> = (0..30).map(|i| ((i * 7) % 30) as f64).collect();
        let y = x.iter().map(|&v| if v > 14.5 { 1.0 } else { 0.0 }).collect();
        let s = Samples { num_features: 1, x, y };

        let points = learning_curve(|| Threshold { cut: 0.0 }, &s, 3, &linspace(0.1, 1.0, 5)).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].train_size, 2);
        assert_eq!(points[4].train_size, 20);
        for p in &points {
            assert_eq!(p.test_scores.len(), 3);
            assert!(p.mean_test() >= 0.0 && p.mean_test() <= 1.0);
        }
    }
}
