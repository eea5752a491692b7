//! Boosting driver (spec §4.5): the additive-model loop, DART dropout
//! reweighting, raw-score maintenance, checkpointing and evaluation.

use std::collections::HashMap;

use cpu_time::ProcessTime;
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::seq::sample_indices;
use rand::SeedableRng;

use crate::callback::{Callback, CallbackContext};
use crate::config::{BoostConfig, BoostType};
use crate::data::{Dataset, RawTable};
use crate::error::{GbmError, GbmResult};
use crate::metric::IncrementalMetric;
use crate::model::Model;
use crate::objective::Objective;
use crate::tree::grow_tree;
use crate::NumT;

/// Held-out rows evaluated each round against the model-under-training
/// (spec §4.5 step 8's "optional test" eval). Kept as raw feature rows
/// rather than a `Dataset` so evaluation always runs through the training
/// discretizer (`Model::predict`) instead of re-fitting a second one.
struct TestSet {
    rows: Vec<Vec<NumT>>,
    labels: Vec<Vec<NumT>>,
    weights: Vec<NumT>,
}

/// Running raw scores (spec §3): GBTree keeps one accumulated vector per
/// row; DART keeps every tree's own raw contribution so dropout can
/// recompute the accumulated score from a subset.
enum RawScores {
    GbTree(Vec<Vec<NumT>>),
    Dart(Vec<Vec<NumT>>), // per row: one NumT per tree built so far
}

/// Materializes the raw-scores state into a fresh owned buffer and drops
/// the old one -- the single-process analogue of spec §5/§9's periodic
/// checkpoint that truncates a growing execution lineage.
struct Checkpointer {
    interval: i64,
    last_checkpoint_iter: usize,
}

impl Checkpointer {
    fn new(interval: i64) -> Checkpointer {
        Checkpointer { interval, last_checkpoint_iter: 0 }
    }

    fn maybe_checkpoint(&mut self, iter: usize, raw: &mut RawScores) {
        if self.interval <= 0 {
            return;
        }
        if iter > 0 && iter % self.interval as usize == 0 {
            match raw {
                RawScores::GbTree(v) => {
                    let materialized: Vec<Vec<NumT>> = v.iter().cloned().collect();
                    *v = materialized;
                }
                RawScores::Dart(v) => {
                    let materialized: Vec<Vec<NumT>> = v.iter().cloned().collect();
                    *v = materialized;
                }
            }
            self.last_checkpoint_iter = iter;
        }
    }
}

pub struct BoostingDriver<'a> {
    config: BoostConfig,
    dataset: &'a Dataset,
    objective: &'a dyn Objective,
    model: Model,
    raw: RawScores,
    dropped: Vec<usize>, // base-model indices masked out while this round's gradients are computed
    last_dropped: Vec<usize>, // retained after the round for introspection/testing
    train_history: HashMap<String, Vec<NumT>>,
    test_history: HashMap<String, Vec<NumT>>,
    test: Option<TestSet>,
    seed_counter: u64,
}

impl<'a> BoostingDriver<'a> {
    pub fn new(config: BoostConfig, dataset: &'a Dataset, objective: &'a dyn Objective) -> GbmResult<BoostingDriver<'a>> {
        config.validate()?;
        let raw_size = dataset.raw_size();
        let base_score = match config.base_score {
            crate::config::BaseScore::Auto => dataset.label_mean(),
            crate::config::BaseScore::Fixed(v) => vec![v; raw_size],
        };
        let model = Model::new(base_score.clone(), raw_size, dataset.discretizer().clone());

        let nrows = dataset.nrows();
        let raw = match config.boost_type {
            BoostType::GBTree => RawScores::GbTree(vec![base_score.clone(); nrows]),
            BoostType::Dart => RawScores::Dart(vec![Vec::new(); nrows]),
            BoostType::Goss => return Err(GbmError::config("boost_type=goss not implemented")),
        };

        Ok(BoostingDriver {
            config,
            dataset,
            objective,
            model,
            raw,
            dropped: Vec::new(),
            last_dropped: Vec::new(),
            train_history: HashMap::new(),
            test_history: HashMap::new(),
            test: None,
            seed_counter: 0,
        })
    }

    /// Resume training from a previously-trained model (spec §8 scenario 6:
    /// "initial model continuation").
    pub fn with_initial_model(
        config: BoostConfig,
        dataset: &'a Dataset,
        objective: &'a dyn Objective,
        initial: Model,
    ) -> GbmResult<BoostingDriver<'a>> {
        config.validate()?;
        let nrows = dataset.nrows();
        let seed_counter = initial.seed_counter;
        let mut driver = match config.boost_type {
            BoostType::GBTree => {
                let raw = RawScores::GbTree(vec![initial.base_score.clone(); nrows]);
                BoostingDriver {
                    config,
                    dataset,
                    objective,
                    model: initial,
                    raw,
                    dropped: Vec::new(),
                    last_dropped: Vec::new(),
                    train_history: HashMap::new(),
                    test_history: HashMap::new(),
                    test: None,
                    seed_counter,
                }
            }
            BoostType::Dart => {
                let raw = RawScores::Dart(vec![Vec::new(); nrows]);
                BoostingDriver {
                    config,
                    dataset,
                    objective,
                    model: initial,
                    raw,
                    dropped: Vec::new(),
                    last_dropped: Vec::new(),
                    train_history: HashMap::new(),
                    test_history: HashMap::new(),
                    test: None,
                    seed_counter,
                }
            }
            BoostType::Goss => return Err(GbmError::config("boost_type=goss not implemented")),
        };
        driver.replay_raw_scores()?;
        Ok(driver)
    }

    fn replay_raw_scores(&mut self) -> GbmResult<()> {
        for r in 0..self.dataset.nrows() {
            let row_bins = self.dataset.bins().row(r);
            match &mut self.raw {
                RawScores::GbTree(v) => {
                    let mut acc = self.model.base_score.clone();
                    for (i, t) in self.model.trees.iter().enumerate() {
                        acc[t.output_index % self.model.raw_size] += self.model.weights[i] * t.predict_scalar(&row_bins);
                    }
                    v[r] = acc;
                }
                RawScores::Dart(v) => {
                    v[r] = self.model.trees.iter().map(|t| t.predict_scalar(&row_bins)).collect();
                }
            }
        }
        Ok(())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn train_history(&self) -> &HashMap<String, Vec<NumT>> {
        &self.train_history
    }

    pub fn test_history(&self) -> &HashMap<String, Vec<NumT>> {
        &self.test_history
    }

    /// Register a held-out set, evaluated alongside the training set at the
    /// end of every subsequent `step` (spec §4.5 step 8). `raw`'s last
    /// `raw_size` columns are the label, matching `Dataset::from_raw`'s
    /// convention, but the feature columns are kept un-discretized and
    /// transformed through `Model::predict` at eval time rather than fit
    /// into a second `Discretizer`.
    pub fn set_test_set(&mut self, raw: &RawTable) -> GbmResult<()> {
        let raw_size = self.model.raw_size;
        if raw_size == 0 || raw_size >= raw.ncols() {
            return Err(GbmError::shape("raw_size < ncols", raw_size));
        }
        let nfeatures = raw.ncols() - raw_size;
        let mut rows = Vec::with_capacity(raw.nrows());
        let mut labels = Vec::with_capacity(raw.nrows());
        for r in 0..raw.nrows() {
            let full = raw.row(r);
            rows.push(full[..nfeatures].to_vec());
            labels.push(full[nfeatures..].to_vec());
        }
        let weights = vec![1.0; raw.nrows()];
        self.test = Some(TestSet { rows, labels, weights });
        Ok(())
    }

    /// Base models dropped by the most recently completed round (empty
    /// outside DART, or for a GBTree-only driver).
    pub fn last_dropped(&self) -> &[usize] {
        &self.last_dropped
    }

    fn next_seed(&mut self) -> u64 {
        self.seed_counter += 1;
        self.config.seed.wrapping_add(self.seed_counter)
    }

    fn num_base_models(&self) -> usize {
        self.model.trees.len() / self.model.raw_size.max(1)
    }

    /// Effective per-row raw score, honoring DART dropout (spec §4.5 step 2).
    fn effective_raw(&self, row: usize) -> Vec<NumT> {
        match &self.raw {
            RawScores::GbTree(v) => v[row].clone(),
            RawScores::Dart(per_tree) => {
                let mut acc = self.model.base_score.clone();
                for (i, &r) in per_tree[row].iter().enumerate() {
                    if self.dropped.contains(&i) {
                        continue;
                    }
                    let t = &self.model.trees[i];
                    acc[t.output_index % self.model.raw_size] += self.model.weights[i] * r;
                }
                acc
            }
        }
    }

    /// DART dropout sampling (spec §4.5 step 1).
    fn sample_dropout(&mut self) -> Vec<usize> {
        let num_base = self.num_base_models();
        if num_base == 0 {
            return Vec::new();
        }
        let mut rng = SmallRng::seed_from_u64(self.next_seed());
        use rand::Rng;
        if rng.gen::<NumT>() < self.config.drop_skip {
            return Vec::new();
        }
        let k = ((num_base as NumT * self.config.drop_rate).ceil() as usize)
            .max(self.config.min_drop)
            .min(self.config.max_drop)
            .min(num_base);
        if k == 0 {
            return Vec::new();
        }
        let mut idx = sample_indices(&mut rng, num_base, k);
        idx.sort_unstable();
        idx
    }

    /// Run one boosting iteration. Returns `false` once the loop should
    /// stop (all-empty iteration or a callback requested termination).
    pub fn step(&mut self, iteration: usize, callbacks: &mut [Box<dyn Callback>]) -> GbmResult<bool> {
        let step_start = ProcessTime::now();
        self.dropped = if self.config.boost_type == BoostType::Dart {
            self.sample_dropout()
        } else {
            Vec::new()
        };
        let k = self.dropped.len();

        let nrows = self.dataset.nrows();
        let raw_size = self.model.raw_size;
        let mut grad_cols = vec![vec![0.0 as NumT; nrows]; raw_size];
        let mut hess_cols = vec![vec![0.0 as NumT; nrows]; raw_size];
        for r in 0..nrows {
            let raw = self.effective_raw(r);
            let label = self.dataset.label(r);
            let w = self.dataset.weight(r);
            let (g, h) = self.objective.compute(label, &raw);
            for k2 in 0..raw_size {
                grad_cols[k2][r] = g[k2] * w;
                hess_cols[k2][r] = h[k2] * w;
            }
        }

        // The leaf fit itself is never pre-scaled: for GBTree the
        // `stepSize` weight assigned below (step 6) is the sole scaling
        // applied when a tree's contribution is added to the raw scores
        // (step 7: `w_new * tree.predict(bins)`); pre-scaling the leaf value
        // here too would apply stepSize twice. DART's weight already carries
        // its own scaling (1, or 1/(k+eta) under dropout), so both boost
        // types grow trees with an unscaled leaf fit.
        let leaf_scale: NumT = 1.0;

        let bins = self.dataset.bins();
        let discretizer = self.dataset.discretizer();
        let ncols = self.dataset.nfeatures();
        let all_rows: Vec<usize> = (0..nrows).collect();
        let nbins_of = |f: usize| discretizer.num_bins(f);
        let is_categorical: Vec<bool> = (0..ncols)
            .map(|f| {
                matches!(
                    discretizer.column_type(f),
                    crate::discretizer::ColumnType::Categorical | crate::discretizer::ColumnType::Rank
                )
            })
            .collect();

        let base_model_parallelism = self.config.base_model_parallelism;
        let mut new_trees = Vec::new();
        for k2 in 0..raw_size {
            for _ in 0..base_model_parallelism {
                let feat_seed = self.next_seed();
                let row_seed = self.next_seed();
                let feat_ids = column_sample_by_tree(ncols, &self.config, feat_seed);
                let cat_for_feats: Vec<bool> = feat_ids.iter().map(|&f| is_categorical[f]).collect();
                let row_sel = row_sample(&all_rows, &self.config, row_seed);

                if let Some(tree) = grow_tree(
                    bins,
                    &nbins_of,
                    &grad_cols[k2],
                    &hess_cols[k2],
                    &row_sel,
                    &feat_ids,
                    &cat_for_feats,
                    &self.config,
                    leaf_scale,
                    k2,
                ) {
                    new_trees.push(tree);
                }
            }
        }

        if new_trees.is_empty() {
            warn!("empty iteration {}: no tree produced", iteration);
            return Err(GbmError::EmptyIteration);
        }

        let eta = self.config.step_size;
        match self.config.boost_type {
            BoostType::GBTree => {
                for t in &new_trees {
                    let weight = self.config.step_size;
                    self.apply_gbtree_tree(t, weight);
                    self.model.trees.push(t.clone());
                    self.model.weights.push(weight);
                }
            }
            BoostType::Dart => {
                if k == 0 {
                    for t in &new_trees {
                        self.model.trees.push(t.clone());
                        self.model.weights.push(1.0);
                    }
                } else {
                    let new_weight = 1.0 / (k as NumT + eta);
                    let rescale = k as NumT / (k as NumT + eta);
                    for &d in &self.dropped {
                        self.model.weights[d] *= rescale;
                    }
                    for t in &new_trees {
                        self.model.trees.push(t.clone());
                        self.model.weights.push(new_weight);
                    }
                }
                self.append_dart_raws(&new_trees)?;
            }
            BoostType::Goss => unreachable!(),
        }
        self.model.check_invariants()?;
        // dropout only masks gradient computation for this round; evaluation
        // and any later prediction see the full, just-updated ensemble.
        self.last_dropped = std::mem::take(&mut self.dropped);
        // keep the persisted seed counter in lockstep so a later
        // `with_initial_model` resumes the seed stream instead of replaying it.
        self.model.seed_counter = self.seed_counter;

        debug!("iteration {}: cpu time for tree growth {:?}", iteration, step_start.elapsed());
        info!("iteration {}: {} tree(s) added", iteration, new_trees.len());
        self.evaluate_and_record(iteration)?;

        let snapshot_train = self.train_history.clone();
        let snapshot_test = self.test_history.clone();
        let mut stop = false;
        for cb in callbacks.iter_mut() {
            let ctx = CallbackContext {
                config: &self.config,
                model: &self.model,
                iteration,
                train_history: &snapshot_train,
                test_history: &snapshot_test,
            };
            if cb.compute(&ctx) {
                stop = true;
            }
        }
        Ok(!stop)
    }

    fn apply_gbtree_tree(&mut self, tree: &crate::tree::Tree, weight: NumT) {
        if let RawScores::GbTree(v) = &mut self.raw {
            for r in 0..self.dataset.nrows() {
                let row_bins = self.dataset.bins().row(r);
                v[r][tree.output_index % self.model.raw_size] += weight * tree.predict_scalar(&row_bins);
            }
        }
    }

    fn append_dart_raws(&mut self, trees: &[crate::tree::Tree]) -> GbmResult<()> {
        if let RawScores::Dart(v) = &mut self.raw {
            for r in 0..self.dataset.nrows() {
                let row_bins = self.dataset.bins().row(r);
                for t in trees {
                    v[r].push(t.predict_scalar(&row_bins));
                }
            }
        }
        Ok(())
    }

    fn evaluate_and_record(&mut self, _iteration: usize) -> GbmResult<()> {
        let metric = crate::metric::Rmse;
        let mut acc = metric.zero();
        for r in 0..self.dataset.nrows() {
            let raw = match &self.raw {
                RawScores::GbTree(v) => v[r].clone(),
                RawScores::Dart(_) => self.effective_raw(r),
            };
            let score = self.objective.transform(&raw);
            acc = metric.fold(acc, self.dataset.weight(r), self.dataset.label(r), &score);
        }
        let value = metric.finish(acc);
        self.train_history.entry(metric.name().to_string()).or_insert_with(Vec::new).push(value);

        if let Some(test) = &self.test {
            let mut tacc = metric.zero();
            let n = self.model.trees.len();
            for r in 0..test.rows.len() {
                let raw = self.model.predict(&test.rows[r], n)?;
                let score = self.objective.transform(&raw);
                tacc = metric.fold(tacc, test.weights[r], &test.labels[r], &score);
            }
            let tvalue = metric.finish(tacc);
            self.test_history.entry(metric.name().to_string()).or_insert_with(Vec::new).push(tvalue);
        }
        Ok(())
    }

    /// Run the full boosting loop to `max_iter` or until an early
    /// termination condition fires (spec §4.5 step 10 / Termination).
    pub fn train(&mut self, callbacks: &mut [Box<dyn Callback>]) -> GbmResult<()> {
        let mut checkpointer = Checkpointer::new(self.config.checkpoint_interval);
        for iter in 0..self.config.max_iter {
            match self.step(iter, callbacks) {
                Ok(true) => {}
                Ok(false) => break,
                Err(GbmError::EmptyIteration) => break,
                Err(e) => return Err(e),
            }
            checkpointer.maybe_checkpoint(iter, &mut self.raw);
        }
        Ok(())
    }
}

fn column_sample_by_tree(ncols: usize, config: &BoostConfig, seed: u64) -> Vec<usize> {
    if config.col_sample_by_tree >= 1.0 {
        return (0..ncols).collect();
    }
    let k = ((ncols as NumT) * config.col_sample_by_tree).ceil().max(1.0) as usize;
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut v = sample_indices(&mut rng, ncols, k.min(ncols));
    v.sort_unstable();
    v
}

fn row_sample(rows: &[usize], config: &BoostConfig, seed: u64) -> Vec<usize> {
    if config.sub_sample >= 1.0 {
        return rows.to_vec();
    }
    let k = ((rows.len() as NumT) * config.sub_sample).round().max(1.0) as usize;
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut idx = sample_indices(&mut rng, rows.len(), k.min(rows.len()));
    idx.sort_unstable();
    idx.into_iter().map(|i| rows[i]).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BoostType;
    use crate::data::{Dataset, RawTable};
    use crate::objective::SquaredError;

    fn linear_dataset() -> (BoostConfig, Dataset) {
        let mut config = BoostConfig::new();
        config.csv_has_header = false;
        config.max_bins = 16;
        config.max_depth = 3;
        config.step_size = 0.1;
        config.reg_lambda = 0.0;
        config.max_iter = 50;
        let csv = "0,3\n1,5\n2,7\n3,9\n4,11\n5,13\n6,15\n7,17\n";
        let raw = RawTable::from_csv_str(&config, csv).unwrap();
        let ds = Dataset::from_raw(&config, &raw, 1).unwrap();
        (config, ds)
    }

    #[test]
    fn scenario_linear_regression_converges() {
        let (config, ds) = linear_dataset();
        let obj = SquaredError;
        let mut driver = BoostingDriver::new(config, &ds, &obj).unwrap();
        driver.train(&mut []).unwrap();
        let rmse_history = &driver.train_history()["rmse"];
        let last = *rmse_history.last().unwrap();
        assert!(last * last < 0.05, "train MSE {} not below 0.05", last * last);
    }

    #[test]
    fn test_set_produces_per_round_test_history() {
        let (config, ds) = linear_dataset();
        let obj = SquaredError;
        let mut driver = BoostingDriver::new(config.clone(), &ds, &obj).unwrap();
        let test_csv = "8,19\n9,21\n";
        let test_raw = RawTable::from_csv_str(&config, test_csv).unwrap();
        driver.set_test_set(&test_raw).unwrap();
        driver.train(&mut []).unwrap();
        let train_rounds = driver.train_history()["rmse"].len();
        let test_rounds = driver.test_history()["rmse"].len();
        assert_eq!(train_rounds, test_rounds);
        assert!(test_rounds > 0);
    }

    #[test]
    fn len_trees_eq_len_weights_after_training() {
        let (config, ds) = linear_dataset();
        let obj = SquaredError;
        let mut driver = BoostingDriver::new(config, &ds, &obj).unwrap();
        driver.train(&mut []).unwrap();
        assert_eq!(driver.model().trees.len(), driver.model().weights.len());
    }

    #[test]
    fn dart_reweighting_identity_holds() {
        let mut config = BoostConfig::new();
        config.csv_has_header = false;
        config.max_bins = 8;
        config.max_depth = 2;
        config.boost_type = BoostType::Dart;
        config.drop_rate = 0.5;
        config.drop_skip = 0.0;
        config.min_drop = 1;
        config.seed = 42;
        config.max_iter = 1;
        let csv = "0,3\n1,5\n2,7\n3,9\n4,11\n5,13\n6,15\n7,17\n";
        let raw = RawTable::from_csv_str(&config, csv).unwrap();
        let ds = Dataset::from_raw(&config, &raw, 1).unwrap();
        let obj = SquaredError;

        // Pre-seed with a few GBTree-style trees acting as "already built"
        // base models for dropout to act on.
        let mut pretrain_cfg = config.clone();
        pretrain_cfg.boost_type = BoostType::GBTree;
        pretrain_cfg.max_iter = 5;
        let mut pre = BoostingDriver::new(pretrain_cfg, &ds, &obj).unwrap();
        pre.train(&mut []).unwrap();
        let base_model = pre.model();

        let mut driver = BoostingDriver::with_initial_model(
            config,
            &ds,
            &obj,
            Model::new(base_model.base_score.clone(), base_model.raw_size, base_model.discretizer.clone()),
        )
        .unwrap();
        // seed with the pretrained trees so there is something to drop
        for (t, w) in base_model.trees.iter().zip(base_model.weights.iter()) {
            driver.model.trees.push(t.clone());
            driver.model.weights.push(*w);
        }
        driver.replay_raw_scores().unwrap();

        let weights_before: Vec<NumT> = driver.model.weights.clone();
        driver.step(0, &mut []).unwrap();
        let dropped = driver.last_dropped.clone();
        if dropped.is_empty() {
            return; // drop_skip=0 but RNG draw still allows zero-size drop via min_drop/num_base edge cases
        }
        let k = dropped.len() as NumT;
        let eta = driver.config.step_size;
        let sum_before: NumT = dropped.iter().map(|&i| weights_before[i]).sum();
        let sum_after_dropped: NumT = dropped.iter().map(|&i| driver.model.weights[i]).sum();
        let new_tree_weight = *driver.model.weights.last().unwrap();
        let lhs = sum_after_dropped + new_tree_weight;
        let rhs = sum_before * (k / (k + eta)) + 1.0 / (k + eta);
        assert!((lhs - rhs).abs() < 1e-3, "lhs={} rhs={}", lhs, rhs);
    }
}
