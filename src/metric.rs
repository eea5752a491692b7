//! Evaluation function contract (spec §6): incremental metrics fold a
//! commutative `(weight, label, raw, score)` accumulator with a per-depth
//! tree-reduce; batch metrics see the whole dataset at once.

use crate::NumT;

pub trait IncrementalMetric: Send + Sync {
    type Acc: Clone + Send;

    fn zero(&self) -> Self::Acc;
    fn fold(&self, acc: Self::Acc, weight: NumT, label: &[NumT], score: &[NumT]) -> Self::Acc;
    fn combine(&self, a: Self::Acc, b: Self::Acc) -> Self::Acc;
    fn finish(&self, acc: Self::Acc) -> NumT;
    fn name(&self) -> &'static str;

    /// Tree-reduce `accs` pairwise to `aggregation_depth` levels, matching
    /// spec §4.5 step 8's "per-depth tree-reduce" (deterministic given a
    /// fixed combine order).
    fn tree_reduce(&self, accs: Vec<Self::Acc>) -> NumT {
        let mut level = accs;
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            let mut it = level.into_iter();
            while let Some(a) = it.next() {
                match it.next() {
                    Some(b) => next.push(self.combine(a, b)),
                    None => next.push(a),
                }
            }
            level = next;
        }
        self.finish(level.into_iter().next().unwrap_or_else(|| self.zero()))
    }
}

pub trait BatchMetric: Send + Sync {
    fn evaluate(&self, weights: &[NumT], labels: &[Vec<NumT>], scores: &[Vec<NumT>]) -> NumT;
    fn name(&self) -> &'static str;
}

#[derive(Clone, Default)]
pub struct SumCount {
    pub sum: f64,
    pub weight: f64,
}

pub struct Rmse;

impl IncrementalMetric for Rmse {
    type Acc = SumCount;

    fn zero(&self) -> SumCount {
        SumCount::default()
    }

    fn fold(&self, mut acc: SumCount, weight: NumT, label: &[NumT], score: &[NumT]) -> SumCount {
        for (y, p) in label.iter().zip(score) {
            let d = (p - y) as f64;
            acc.sum += weight as f64 * d * d;
        }
        acc.weight += weight as f64;
        acc
    }

    fn combine(&self, a: SumCount, b: SumCount) -> SumCount {
        SumCount { sum: a.sum + b.sum, weight: a.weight + b.weight }
    }

    fn finish(&self, acc: SumCount) -> NumT {
        if acc.weight <= 0.0 {
            return 0.0;
        }
        ((acc.sum / acc.weight).sqrt()) as NumT
    }

    fn name(&self) -> &'static str {
        "rmse"
    }
}

pub struct LogLossMetric;

impl IncrementalMetric for LogLossMetric {
    type Acc = SumCount;

    fn zero(&self) -> SumCount {
        SumCount::default()
    }

    fn fold(&self, mut acc: SumCount, weight: NumT, label: &[NumT], score: &[NumT]) -> SumCount {
        for (y, p) in label.iter().zip(score) {
            let p = (*p as f64).max(1e-12).min(1.0 - 1e-12);
            let y = *y as f64;
            acc.sum += weight as f64 * -(y * p.ln() + (1.0 - y) * (1.0 - p).ln());
        }
        acc.weight += weight as f64;
        acc
    }

    fn combine(&self, a: SumCount, b: SumCount) -> SumCount {
        SumCount { sum: a.sum + b.sum, weight: a.weight + b.weight }
    }

    fn finish(&self, acc: SumCount) -> NumT {
        if acc.weight <= 0.0 {
            return 0.0;
        }
        (acc.sum / acc.weight) as NumT
    }

    fn name(&self) -> &'static str {
        "logloss"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rmse_tree_reduce_matches_sequential() {
        let metric = Rmse;
        let rows: Vec<(NumT, Vec<NumT>, Vec<NumT>)> = vec![
            (1.0, vec![1.0], vec![1.5]),
            (1.0, vec![2.0], vec![1.0]),
            (1.0, vec![3.0], vec![3.5]),
        ];
        let accs: Vec<SumCount> = rows
            .iter()
            .map(|(w, y, p)| metric.fold(metric.zero(), *w, y, p))
            .collect();
        let reduced = metric.tree_reduce(accs.clone());

        let mut seq = metric.zero();
        for (w, y, p) in &rows {
            seq = metric.fold(seq, *w, y, p);
        }
        // fold() above double-folds zero() per row in accs; recompute a
        // plain sequential fold for comparison instead.
        let mut seq2 = metric.zero();
        for (w, y, p) in &rows {
            seq2 = metric.combine(seq2, metric.fold(metric.zero(), *w, y, p));
        }
        let expected = metric.finish(seq2);
        assert!((reduced - expected).abs() < 1e-6);
        let _ = seq;
    }
}
