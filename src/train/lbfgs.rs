//! Limited-memory BFGS with a backtracking Armijo line search.

use std::collections::VecDeque;

/// Why [`Lbfgs::minimize`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Gradient inf-norm fell to the tolerance.
    Converged,
    MaxIterations,
    /// The line search found no decrease.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub status: Status,
}

/// L-BFGS minimizer.
///
/// The objective returns `(f(x), ∇f(x))` in one call.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    pub max_iter: usize,
    pub tol: f64,
    /// Number of `(s, y)` correction pairs kept.
    pub history: usize,
}

const ARMIJO_C1: f64 = 1e-4;
const BACKTRACK: f64 = 0.5;
const MAX_BACKTRACKS: usize = 50;

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Lbfgs {
    pub fn new(max_iter: usize, tol: f64, history: usize) -> Self {
        Lbfgs {
            max_iter,
            tol,
            history,
        }
    }

    /// Two-loop recursion: returns the descent direction `-H·g`.
    fn direction(pairs: &VecDeque<(Vec<f64>, Vec<f64>)>, grad: &[f64]) -> Vec<f64> {
        let mut q: Vec<f64> = grad.iter().map(|g| -g).collect();
        let Some((s_last, y_last)) = pairs.back() else {
            return q;
        };

        let mut alpha = vec![0.0; pairs.len()];
        let rho: Vec<f64> = pairs.iter().map(|(s, y)| 1.0 / dot(y, s)).collect();

        for (k, (s, y)) in pairs.iter().enumerate().rev() {
            alpha[k] = rho[k] * dot(s, &q);
            for (qi, yi) in q.iter_mut().zip(y) {
                *qi -= alpha[k] * yi;
            }
        }

        let gamma = dot(s_last, y_last) / dot(y_last, y_last);
        for qi in &mut q {
            *qi *= gamma;
        }

        for (k, (s, y)) in pairs.iter().enumerate() {
            let beta = rho[k] * dot(y, &q);
            for (qi, si) in q.iter_mut().zip(s) {
                *qi += si * (alpha[k] - beta);
            }
        }
        q
    }

    pub fn minimize<F>(&self, objective: F, x0: Vec<f64>) -> Minimum
    where
        F: Fn(&[f64]) -> (f64, Vec<f64>),
    {
        let mut pairs: VecDeque<(Vec<f64>, Vec<f64>)> = VecDeque::with_capacity(self.history);
        let mut x = x0;
        let (mut fx, mut grad) = objective(&x);

        for iter in 0..self.max_iter {
            if inf_norm(&grad) <= self.tol {
                return Minimum {
                    x,
                    value: fx,
                    iterations: iter,
                    status: Status::Converged,
                };
            }

            let mut d = Self::direction(&pairs, &grad);
            let mut slope = dot(&grad, &d);
            if slope >= 0.0 {
                // Not a descent direction; restart from steepest descent.
                pairs.clear();
                d = grad.iter().map(|g| -g).collect();
                slope = dot(&grad, &d);
            }

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let candidate: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + step * di).collect();
                let (f_new, g_new) = objective(&candidate);
                if f_new.is_finite() && f_new <= fx + ARMIJO_C1 * step * slope {
                    accepted = Some((candidate, f_new, g_new));
                    break;
                }
                step *= BACKTRACK;
            }

            let Some((x_new, f_new, g_new)) = accepted else {
                return Minimum {
                    x,
                    value: fx,
                    iterations: iter,
                    status: Status::Stalled,
                };
            };

            let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = g_new.iter().zip(&grad).map(|(a, b)| a - b).collect();
            if dot(&y, &s) > 1e-10 {
                if pairs.len() == self.history {
                    pairs.pop_front();
                }
                pairs.push_back((s, y));
            }

            x = x_new;
            fx = f_new;
            grad = g_new;
        }

        let status = if inf_norm(&grad) <= self.tol {
            Status::Converged
        } else {
            Status::MaxIterations
        };
        Minimum {
            x,
            value: fx,
            iterations: self.max_iter,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_converges() {
        let f = |x: &[f64]| ((x[0] - 5.0).powi(2), vec![2.0 * (x[0] - 5.0)]);
        let m = Lbfgs::new(100, 1e-8, 10).minimize(f, vec![0.0]);
        assert_eq!(m.status, Status::Converged);
        assert!((m.x[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn rosenbrock_converges() {
        let f = |x: &[f64]| {
            let (a, b) = (x[0], x[1]);
            (
                (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2),
                vec![-2.0 * (1.0 - a) - 400.0 * a * (b - a * a), 200.0 * (b - a * a)],
            )
        };
        let m = Lbfgs::new(1000, 1e-5, 10).minimize(f, vec![-1.2, 1.0]);
        assert_eq!(m.status, Status::Converged);
        assert!((m.x[0] - 1.0).abs() < 1e-3);
        assert!((m.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn already_at_minimum() {
        let f = |x: &[f64]| (x[0] * x[0], vec![2.0 * x[0]]);
        let m = Lbfgs::new(100, 1e-5, 10).minimize(f, vec![0.0]);
        assert_eq!(m.status, Status::Converged);
        assert_eq!(m.iterations, 0);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let f = |x: &[f64]| {
            let (a, b) = (x[0], x[1]);
            (
                (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2),
                vec![-2.0 * (1.0 - a) - 400.0 * a * (b - a * a), 200.0 * (b - a * a)],
            )
        };
        let m = Lbfgs::new(3, 1e-12, 10).minimize(f, vec![-1.2, 1.0]);
        assert_eq!(m.status, Status::MaxIterations);
        assert_eq!(m.iterations, 3);
    }
}
