//! Execution plane (spec §4.6): a small data-parallel partition abstraction
//! modeling the RDD-style operations the boosting driver needs --
//! reorganization, sampling, allgather, partition extension -- backed by
//! `rayon` over in-process `Vec<Vec<T>>` partitions rather than an actual
//! cluster shuffle (spec §1 scopes real cluster-runtime primitives out of
//! this core; §9 notes the single-process analogue is "collect-and-
//! rebroadcast" where a real persist+checkpoint isn't available).

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// A dataset split into independent row groups, the unit of work dispatched
/// to worker threads each boosting step.
#[derive(Debug, Clone)]
pub struct PartitionedDataset<T> {
    pub partitions: Vec<Vec<T>>,
}

impl<T: Send + Sync + Clone> PartitionedDataset<T> {
    pub fn from_rows(rows: Vec<T>, npartitions: usize) -> PartitionedDataset<T> {
        let npartitions = npartitions.max(1);
        let mut partitions: Vec<Vec<T>> = vec![Vec::new(); npartitions];
        for (i, row) in rows.into_iter().enumerate() {
            partitions[i % npartitions].push(row);
        }
        PartitionedDataset { partitions }
    }

    pub fn npartitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn total_rows(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn map<U: Send>(&self, f: impl Fn(&[T]) -> U + Sync) -> Vec<U> {
        self.partitions.par_iter().map(|p| f(p)).collect()
    }

    /// Narrow-dependency partition reorganization: partition `i` of the
    /// result is the concatenation of the parent partitions named in
    /// `groups[i]`.
    pub fn reorganize(&self, groups: &[Vec<usize>]) -> PartitionedDataset<T> {
        let partitions = groups
            .iter()
            .map(|members| {
                let mut out = Vec::new();
                for &m in members {
                    out.extend_from_slice(&self.partitions[m]);
                }
                out
            })
            .collect();
        PartitionedDataset { partitions }
    }

    /// Replicate parent partitions (round-robin) to reach `target_count`
    /// partitions without shuffling row data.
    pub fn extend_partitions(&self, target_count: usize) -> PartitionedDataset<T> {
        if target_count <= self.npartitions() {
            return self.clone();
        }
        let groups: Vec<Vec<usize>> =
            (0..target_count).map(|i| vec![i % self.npartitions()]).collect();
        self.reorganize(&groups)
    }

    /// Per-partition seeded sampling: `weight == 1.0` keeps the whole
    /// partition, `weight == 0.0` drops it, anything in between row-filters
    /// with a per-partition PRNG seeded from `seed + partition_index`.
    pub fn sample(&self, weights: &[f64], seed: u64) -> PartitionedDataset<T> {
        debug_assert_eq!(weights.len(), self.npartitions());
        let partitions = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(i, part)| {
                let w = weights[i];
                if w >= 1.0 {
                    part.clone()
                } else if w <= 0.0 {
                    Vec::new()
                } else {
                    let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
                    part.iter().filter(|_| rng.gen::<f64>() < w).cloned().collect()
                }
            })
            .collect();
        PartitionedDataset { partitions }
    }
}

/// Allgather: reshape an N-partition dataset into N output partitions, each
/// holding the *entire* dataset, ordered by `(source_partition,
/// row_ordinal)` (spec §4.6/§9's deterministic allgather ordering) -- used
/// to make column-partitioned (vertical) histogram builders see every row's
/// gradient.
pub fn allgather<T: Clone + Send + Sync>(ds: &PartitionedDataset<T>, noutputs: usize) -> PartitionedDataset<T> {
    let mut all = Vec::with_capacity(ds.total_rows());
    for part in &ds.partitions {
        all.extend(part.iter().cloned());
    }
    let partitions = vec![all; noutputs.max(1)];
    PartitionedDataset { partitions }
}

/// Block sampling: coarser, faster than per-row instance sampling -- keeps
/// or drops whole fixed-size blocks instead of individual rows.
pub fn sample_blocks<T: Clone>(rows: &[T], block_size: usize, keep_fraction: f64, seed: u64) -> Vec<T> {
    if keep_fraction >= 1.0 {
        return rows.to_vec();
    }
    let block_size = block_size.max(1);
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut out = Vec::new();
    for chunk in rows.chunks(block_size) {
        if rng.gen::<f64>() < keep_fraction {
            out.extend_from_slice(chunk);
        }
    }
    out
}

/// Instance (row-level) sampling: finer granularity than block sampling.
pub fn sample_instances<T: Clone>(rows: &[T], keep_fraction: f64, seed: u64) -> Vec<T> {
    if keep_fraction >= 1.0 {
        return rows.to_vec();
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    rows.iter().filter(|_| rng.gen::<f64>() < keep_fraction).cloned().collect()
}
