//! Tree data model (spec §3 "Tree", §9 "flat node arrays") and the
//! level-wise tree learner (spec §4.4).
//!
//! Open Question resolution (recorded in DESIGN.md): each `Tree` fits a
//! single scalar output component (`output_index`); a boosting round grows
//! `base_model_parallelism * raw_size` such trees and routes each one's
//! scalar contribution into its `output_index` slot of the row's raw-score
//! vector. This keeps `len(trees) % raw_size == 0` under DART (spec §3)
//! while collapsing to the ordinary scalar-objective case when `raw_size ==
//! 1`, which is all of the §8 end-to-end scenarios.

use rayon::prelude::*;

use crate::bin_matrix::BinMatrix;
use crate::config::BoostConfig;
use crate::histogram::{build_node_histogram, build_node_histogram_vertical, NodeHistogram};
use crate::split::{find_best_split, soft_threshold, SplitKind, SplitPayload};
use crate::NumT;

#[derive(Debug, Clone)]
pub enum NodeData {
    Leaf {
        value: NumT,
    },
    Split {
        feature: usize,
        kind: SplitKind,
        payload: SplitPayload,
        gain: NumT,
        left: usize,
        right: usize,
        default_left: bool,
    },
}

/// Flat, level-order node array; index 0 is the root (spec §9's
/// back-pointer-free representation).
#[derive(Debug, Clone)]
pub struct Tree {
    pub nodes: Vec<NodeData>,
    pub output_index: usize,
}

impl Tree {
    pub fn nleaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, NodeData::Leaf { .. })).count()
    }

    /// Walk from the root to the leaf for one row's bins, following the
    /// committed split's default direction whenever the feature's bin is 0
    /// (missing).
    pub fn leaf_id(&self, row_bins: &[u32]) -> usize {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                NodeData::Leaf { .. } => return id,
                NodeData::Split { feature, kind, payload, left, right, default_left, .. } => {
                    let bin = row_bins[*feature];
                    let goes_left = if bin == 0 {
                        *default_left
                    } else {
                        match (kind, payload) {
                            (SplitKind::NumericThreshold, SplitPayload::NumericThreshold { bin_threshold }) => {
                                bin <= *bin_threshold
                            }
                            (SplitKind::CategoricalSet, SplitPayload::CategoricalSet { left_bins }) => {
                                left_bins.contains(&bin)
                            }
                            _ => unreachable!("split kind/payload mismatch"),
                        }
                    };
                    id = if goes_left { *left } else { *right };
                }
            }
        }
    }

    pub fn predict_scalar(&self, row_bins: &[u32]) -> NumT {
        match &self.nodes[self.leaf_id(row_bins)] {
            NodeData::Leaf { value } => *value,
            _ => unreachable!(),
        }
    }

    /// Sum of `weight * gain` at every split node using `feature`, for
    /// feature-importance (spec §4.7).
    pub fn importance_contribution(&self, weight: NumT, out: &mut std::collections::HashMap<usize, f64>) {
        for node in &self.nodes {
            if let NodeData::Split { feature, gain, .. } = node {
                *out.entry(*feature).or_insert(0.0) += (weight * *gain) as f64;
            }
        }
    }
}

struct FrontierItem {
    id: usize,
    rows: Vec<usize>,
    hist: NodeHistogram,
    depth: usize,
}

/// Grow one tree for output component `output_index` over `rows`, using
/// `feat_ids` as the tree-level (post `colSampleByTree`) candidate feature
/// set, `is_categorical` parallel to `feat_ids`, and `leaf_scale` (always
/// 1.0 in this crate: the per-tree weight assigned by the boosting driver,
/// not the leaf fit itself, carries `stepSize`/DART's dropout rescaling --
/// spec §4.4 "Leaf value" / §4.5 step 6).
pub fn grow_tree(
    bins: &BinMatrix,
    nbins_of: &(impl Fn(usize) -> usize + Sync),
    grad: &[NumT],
    hess: &[NumT],
    rows: &[usize],
    feat_ids: &[usize],
    is_categorical: &[bool],
    config: &BoostConfig,
    leaf_scale: NumT,
    output_index: usize,
) -> Option<Tree> {
    let hist_for = |rows: &[usize]| -> NodeHistogram {
        if config.vertical_shards > 1 {
            build_node_histogram_vertical(bins, feat_ids, nbins_of, grad, hess, rows, config.vertical_shards)
        } else {
            build_node_histogram(bins, feat_ids, nbins_of, grad, hess, rows)
        }
    };
    let root_hist = hist_for(rows);
    let mut nodes: Vec<Option<NodeData>> = vec![None];
    let mut leaves = 1usize;

    let mut frontier = vec![FrontierItem { id: 0, rows: rows.to_vec(), hist: root_hist, depth: 0 }];

    while !frontier.is_empty() {
        // per-level column subsample (spec §4.4 step 2)
        let level_feat_idx = level_column_sample(feat_ids.len(), config);

        let results: Vec<(usize, Option<SplitResult>)> = frontier
            .par_iter()
            .map(|item| {
                if item.depth >= config.max_depth || leaves >= config.max_leaves {
                    return (item.id, None);
                }
                let selected: Vec<(usize, &crate::histogram::Histogram)> = level_feat_idx
                    .iter()
                    .map(|&i| (feat_ids[i], &item.hist.hists[i]))
                    .collect();
                let selected_cat: Vec<bool> = level_feat_idx.iter().map(|&i| is_categorical[i]).collect();
                let split = find_best_split(&selected, &selected_cat, config);
                (item.id, split.map(SplitResult))
            })
            .collect();

        let mut next_frontier = Vec::new();
        for (item, (_, split)) in frontier.drain(..).zip(results) {
            match split {
                Some(SplitResult(split)) if leaves + 1 <= config.max_leaves => {
                    leaves += 1;
                    let (left_rows, right_rows) = partition_rows(bins, &item.rows, &split);
                    let left_id = nodes.len();
                    nodes.push(None);
                    let right_id = nodes.len();
                    nodes.push(None);
                    nodes[item.id] = Some(NodeData::Split {
                        feature: split.feature,
                        kind: split.kind,
                        payload: split.payload,
                        gain: split.gain,
                        left: left_id,
                        right: right_id,
                        default_left: split.default_left,
                    });
                    let left_hist = hist_for(&left_rows);
                    let right_hist = item.hist.subtract(&left_hist); // subtraction trick (spec §4.2)
                    next_frontier.push(FrontierItem { id: left_id, rows: left_rows, hist: left_hist, depth: item.depth + 1 });
                    next_frontier.push(FrontierItem { id: right_id, rows: right_rows, hist: right_hist, depth: item.depth + 1 });
                }
                _ => {
                    let (sumg, sumh) = item.hist.hists.get(0).map(|h| h.total()).unwrap_or((0.0, 0.0));
                    let value = leaf_value(sumg, sumh, config) * leaf_scale;
                    nodes[item.id] = Some(NodeData::Leaf { value });
                }
            }
        }
        frontier = next_frontier;
    }

    if nodes.len() == 1 {
        // root never split: an all-empty tree signals the caller to stop
        // the boosting loop (spec §4.5 step 5), unless the objective simply
        // wants a constant correction -- we still materialize the leaf so
        // the caller can decide.
    }

    let nodes: Vec<NodeData> = nodes.into_iter().map(|n| n.expect("every node finalized")).collect();
    Some(Tree { nodes, output_index })
}

struct SplitResult(crate::split::SplitCandidate);

fn leaf_value(sumg: f64, sumh: f64, config: &BoostConfig) -> NumT {
    let denom = sumh + config.reg_lambda as f64;
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0; // NumericDegenerate: demoted to a neutral leaf, spec §7
    }
    let soft = soft_threshold(sumg as NumT, config.reg_alpha);
    -(soft as f64 / denom) as NumT
}

fn level_column_sample(nfeat: usize, config: &BoostConfig) -> Vec<usize> {
    if config.col_sample_by_level >= 1.0 || nfeat == 0 {
        return (0..nfeat).collect();
    }
    let k = ((nfeat as NumT) * config.col_sample_by_level).ceil().max(1.0) as usize;
    // deterministic-enough: evenly spaced subset; full seeded sampling lives
    // in the execution plane's partition/column sampling (spec §4.6), this
    // per-level knob just needs to vary which features are searched.
    let stride = (nfeat as f64 / k as f64).max(1.0);
    (0..k).map(|i| ((i as f64 * stride) as usize).min(nfeat - 1)).collect()
}

fn partition_rows(bins: &BinMatrix, rows: &[usize], split: &crate::split::SplitCandidate) -> (Vec<usize>, Vec<usize>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &r in rows {
        let bin = bins.get(r, split.feature);
        let goes_left = if bin == 0 {
            split.default_left
        } else {
            match (&split.kind, &split.payload) {
                (SplitKind::NumericThreshold, SplitPayload::NumericThreshold { bin_threshold }) => bin <= *bin_threshold,
                (SplitKind::CategoricalSet, SplitPayload::CategoricalSet { left_bins }) => left_bins.contains(&bin),
                _ => unreachable!(),
            }
        };
        if goes_left {
            left.push(r);
        } else {
            right.push(r);
        }
    }
    (left, right)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bin_matrix::BinWidth;

    #[test]
    fn grows_and_predicts_linear_like_data() {
        let mut bins = BinMatrix::zeros(BinWidth::U8, 8, 1);
        for r in 0..8 {
            bins.set(r, 0, (r + 1) as u32).unwrap(); // bin 0 reserved missing
        }
        let grad: Vec<NumT> = (0..8).map(|i| -(2.0 * i as NumT + 3.0)).collect();
        let hess: Vec<NumT> = vec![1.0; 8];
        let rows: Vec<usize> = (0..8).collect();
        let config = BoostConfig::new();

        let tree = grow_tree(&bins, &|_| 9, &grad, &hess, &rows, &[0], &[false], &config, 1.0, 0).unwrap();
        assert!(tree.nleaves() >= 1);
        for r in 0..8 {
            let row_bins = bins.row(r);
            let _ = tree.predict_scalar(&row_bins); // just must not panic / index oob
        }
    }
}
