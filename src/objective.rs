//! Objective function contract (spec §6) plus two reference implementations
//! -- a complete core still needs something runnable for the end-to-end
//! scenarios, the way `bitboost::objective` ships alongside the booster
//! even though objective *implementations* are out of this core's primary
//! scope (spec §1).

use crate::NumT;

/// `compute` returns `(grad, hess)` of length `raw_size`; `transform` is the
/// link's inverse, turning a raw score into the objective's natural output
/// space (identity for regression, sigmoid for logistic).
pub trait Objective: Send + Sync {
    fn raw_size(&self) -> usize {
        1
    }
    fn compute(&self, label: &[NumT], raw: &[NumT]) -> (Vec<NumT>, Vec<NumT>);
    fn transform(&self, raw: &[NumT]) -> Vec<NumT>;
    fn name(&self) -> &'static str;
}

/// Squared-error regression: `grad = pred - y`, `hess = 1`.
pub struct SquaredError;

impl Objective for SquaredError {
    fn compute(&self, label: &[NumT], raw: &[NumT]) -> (Vec<NumT>, Vec<NumT>) {
        let pred = self.transform(raw);
        let grad: Vec<NumT> = pred.iter().zip(label).map(|(p, y)| p - y).collect();
        let hess = vec![1.0; label.len()];
        (grad, hess)
    }

    fn transform(&self, raw: &[NumT]) -> Vec<NumT> {
        raw.to_vec()
    }

    fn name(&self) -> &'static str {
        "squared_error"
    }
}

fn sigmoid(x: NumT) -> NumT {
    1.0 / (1.0 + (-x).exp())
}

/// Binary logistic regression: `grad = sigmoid(raw) - y`, `hess =
/// sigmoid(raw) * (1 - sigmoid(raw))`.
pub struct LogLoss;

impl Objective for LogLoss {
    fn compute(&self, label: &[NumT], raw: &[NumT]) -> (Vec<NumT>, Vec<NumT>) {
        let pred = self.transform(raw);
        let grad: Vec<NumT> = pred.iter().zip(label).map(|(p, y)| p - y).collect();
        let hess: Vec<NumT> = pred.iter().map(|p| (p * (1.0 - p)).max(1e-6)).collect();
        (grad, hess)
    }

    fn transform(&self, raw: &[NumT]) -> Vec<NumT> {
        raw.iter().map(|&r| sigmoid(r)).collect()
    }

    fn name(&self) -> &'static str {
        "logloss"
    }
}
