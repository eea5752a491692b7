//! Histogram engine (spec §4.2): per-(node, feature, bin) (grad, hess) sums,
//! with the subtraction trick that derives a sibling from `parent - child`.
//!
//! Sums accumulate in `f64` even though gradients/hessians are `NumT` (f32)
//! so that the additivity invariant (§8: parent == sum of children, up to
//! 1e-6 relative error) holds comfortably over many rows.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::bin_matrix::BinMatrix;
use crate::exec::{allgather, PartitionedDataset};
use crate::NumT;

/// (grad, hess) sums for every bin of a single feature at a single node.
#[derive(Debug, Clone)]
pub struct Histogram {
    pub grad: Vec<f64>,
    pub hess: Vec<f64>,
}

impl Histogram {
    pub fn zeros(nbins: usize) -> Histogram {
        Histogram { grad: vec![0.0; nbins], hess: vec![0.0; nbins] }
    }

    pub fn nbins(&self) -> usize {
        self.grad.len()
    }

    pub fn total(&self) -> (f64, f64) {
        (self.grad.iter().sum(), self.hess.iter().sum())
    }

    pub fn add_assign(&mut self, other: &Histogram) {
        debug_assert_eq!(self.nbins(), other.nbins());
        for i in 0..self.nbins() {
            self.grad[i] += other.grad[i];
            self.hess[i] += other.hess[i];
        }
    }

    /// Elementwise `self - other`, used to derive a sibling node's histogram
    /// from its parent and its already-computed sibling.
    pub fn subtract(&self, other: &Histogram) -> Histogram {
        debug_assert_eq!(self.nbins(), other.nbins());
        let grad = self.grad.iter().zip(&other.grad).map(|(a, b)| a - b).collect();
        let hess = self.hess.iter().zip(&other.hess).map(|(a, b)| a - b).collect();
        Histogram { grad, hess }
    }
}

/// All per-feature histograms for one frontier node.
#[derive(Debug, Clone)]
pub struct NodeHistogram {
    /// Parallel to the node's feature selection (spec §4.4 per-level /
    /// per-tree column subsample): `features[i]` is the original column
    /// index of `hists[i]`.
    pub features: Vec<usize>,
    pub hists: Vec<Histogram>,
}

impl NodeHistogram {
    pub fn merge_into(&mut self, other: &NodeHistogram) {
        debug_assert_eq!(self.features, other.features);
        for (h, oh) in self.hists.iter_mut().zip(&other.hists) {
            h.add_assign(oh);
        }
    }

    pub fn subtract(&self, child: &NodeHistogram) -> NodeHistogram {
        debug_assert_eq!(self.features, child.features);
        let hists = self.hists.iter().zip(&child.hists).map(|(p, c)| p.subtract(c)).collect();
        NodeHistogram { features: self.features.clone(), hists }
    }
}

/// Build the histogram for one node from one partition's rows (horizontal
/// mode, spec §4.2: the caller reduces partition-local `NodeHistogram`s
/// across row partitions with `merge_into`).
pub fn build_node_histogram(
    bins: &BinMatrix,
    feat_ids: &[usize],
    nbins_of: impl Fn(usize) -> usize + Sync,
    grad: &[NumT],
    hess: &[NumT],
    rows: &[usize],
) -> NodeHistogram {
    let hists: Vec<Histogram> = feat_ids
        .par_iter()
        .map(|&f| {
            let mut h = Histogram::zeros(nbins_of(f));
            for &r in rows {
                let b = bins.get(r, f) as usize;
                h.grad[b] += grad[r] as f64;
                h.hess[b] += hess[r] as f64;
            }
            h
        })
        .collect();
    NodeHistogram { features: feat_ids.to_vec(), hists }
}

/// Split `feat_ids` round-robin into `nshards` column groups, the unit a
/// vertical shard owns exclusively.
fn column_shards(feat_ids: &[usize], nshards: usize) -> Vec<Vec<usize>> {
    let mut shards = vec![Vec::new(); nshards];
    for (i, &f) in feat_ids.iter().enumerate() {
        shards[i % nshards].push(f);
    }
    shards
}

/// Build the histogram for one node in vertical (column-partitioned) mode
/// (spec §4.2/§4.6): `feat_ids` is sharded into `nshards` column groups, each
/// row's `(grad, hess)` is all-gathered to every shard so it can build full
/// histograms for its own columns without seeing anyone else's, and the
/// per-shard results are recombined into one `NodeHistogram` ordered like
/// `feat_ids`. Produces the same histograms as `build_node_histogram` over
/// the same `rows`; only the column-sharded construction path differs.
pub fn build_node_histogram_vertical(
    bins: &BinMatrix,
    feat_ids: &[usize],
    nbins_of: impl Fn(usize) -> usize + Sync + Copy,
    grad: &[NumT],
    hess: &[NumT],
    rows: &[usize],
    nshards: usize,
) -> NodeHistogram {
    let nshards = nshards.max(1).min(feat_ids.len().max(1));
    let local: Vec<(usize, NumT, NumT)> = rows.iter().map(|&r| (r, grad[r], hess[r])).collect();
    let gathered = allgather(&PartitionedDataset::from_rows(local, 1), nshards);
    let shards = column_shards(feat_ids, nshards);

    let shard_hists: Vec<NodeHistogram> = shards
        .par_iter()
        .zip(gathered.partitions.par_iter())
        .map(|(shard_feats, triples)| {
            let mut g = vec![0.0 as NumT; bins.nrows()];
            let mut h = vec![0.0 as NumT; bins.nrows()];
            let mut shard_rows = Vec::with_capacity(triples.len());
            for &(r, gr, he) in triples {
                g[r] = gr;
                h[r] = he;
                shard_rows.push(r);
            }
            build_node_histogram(bins, shard_feats, nbins_of, &g, &h, &shard_rows)
        })
        .collect();

    let mut hist_of: HashMap<usize, Histogram> = HashMap::new();
    for nh in shard_hists {
        for (f, h) in nh.features.into_iter().zip(nh.hists.into_iter()) {
            hist_of.insert(f, h);
        }
    }
    let hists = feat_ids
        .iter()
        .map(|f| hist_of.remove(f).expect("feature present in exactly one column shard"))
        .collect();
    NodeHistogram { features: feat_ids.to_vec(), hists }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bin_matrix::BinWidth;

    #[test]
    fn additivity_parent_equals_children_sum() {
        let mut bins = BinMatrix::zeros(BinWidth::U8, 6, 1);
        for r in 0..6 {
            bins.set(r, 0, (r % 3) as u32).unwrap();
        }
        let grad: Vec<NumT> = (0..6).map(|i| i as NumT * 0.1).collect();
        let hess: Vec<NumT> = vec![1.0; 6];
        let all_rows: Vec<usize> = (0..6).collect();
        let left_rows: Vec<usize> = vec![0, 1, 2];
        let right_rows: Vec<usize> = vec![3, 4, 5];

        let parent = build_node_histogram(&bins, &[0], |_| 3, &grad, &hess, &all_rows);
        let left = build_node_histogram(&bins, &[0], |_| 3, &grad, &hess, &left_rows);
        let right = build_node_histogram(&bins, &[0], |_| 3, &grad, &hess, &right_rows);

        let derived_right = parent.subtract(&left);
        for b in 0..3 {
            assert!((derived_right.hists[0].grad[b] - right.hists[0].grad[b]).abs() < 1e-6);
            assert!((derived_right.hists[0].hess[b] - right.hists[0].hess[b]).abs() < 1e-6);
        }

        let (pg, ph) = parent.hists[0].total();
        let mut sumg = 0.0;
        let mut sumh = 0.0;
        for b in 0..3 {
            sumg += left.hists[0].grad[b] + right.hists[0].grad[b];
            sumh += left.hists[0].hess[b] + right.hists[0].hess[b];
        }
        assert!((pg - sumg).abs() < 1e-6);
        assert!((ph - sumh).abs() < 1e-6);
    }

    #[test]
    fn vertical_matches_horizontal() {
        let mut bins = BinMatrix::zeros(BinWidth::U8, 6, 3);
        for r in 0..6 {
            for f in 0..3 {
                bins.set(r, f, ((r + f) % 4) as u32).unwrap();
            }
        }
        let grad: Vec<NumT> = (0..6).map(|i| i as NumT * 0.3 - 1.0).collect();
        let hess: Vec<NumT> = vec![1.0; 6];
        let rows: Vec<usize> = (0..6).collect();
        let feat_ids = [0usize, 1, 2];

        let horizontal = build_node_histogram(&bins, &feat_ids, |_| 4, &grad, &hess, &rows);
        let vertical = build_node_histogram_vertical(&bins, &feat_ids, |_| 4, &grad, &hess, &rows, 2);

        assert_eq!(horizontal.features, vertical.features);
        for (h, v) in horizontal.hists.iter().zip(&vertical.hists) {
            for b in 0..4 {
                assert!((h.grad[b] - v.grad[b]).abs() < 1e-6);
                assert!((h.hess[b] - v.hess[b]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn vertical_shards_clamp_to_feature_count() {
        let mut bins = BinMatrix::zeros(BinWidth::U8, 4, 1);
        for r in 0..4 {
            bins.set(r, 0, (r % 2) as u32).unwrap();
        }
        let grad: Vec<NumT> = vec![0.5; 4];
        let hess: Vec<NumT> = vec![1.0; 4];
        let rows: Vec<usize> = (0..4).collect();

        // nshards (8) exceeds feat_ids.len() (1); must not panic or drop columns.
        let vertical = build_node_histogram_vertical(&bins, &[0], |_| 2, &grad, &hess, &rows, 8);
        assert_eq!(vertical.features, vec![0]);
        let (g, h) = vertical.hists[0].total();
        assert!((g - 2.0).abs() < 1e-6);
        assert!((h - 4.0).abs() < 1e-6);
    }
}
