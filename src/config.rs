use crate::error::{GbmError, GbmResult};
use crate::NumT;

/// `gbtree` accumulates raw scores directly; `dart` keeps per-tree raws and
/// reweights on dropout. `Goss` is a planned-but-not-wired mode (spec §9
/// open question) and is rejected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostType {
    GBTree,
    Dart,
    Goss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericalBinType {
    Width,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPrecision {
    Single,
    Double,
}

/// Base score strategy; `Auto` resolves to the label mean at fit time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaseScore {
    Auto,
    Fixed(NumT),
}

/// All tunables named in spec §6, plus the donor's own CSV-ingestion knobs
/// (`csv_has_header`, `csv_delimiter`, `categorical_features`) carried over
/// unchanged from `bitboost::config::Config`.
#[derive(Debug, Clone)]
pub struct BoostConfig {
    pub max_iter: usize,
    pub max_depth: usize,
    pub max_leaves: usize,
    pub max_bins: usize,
    pub min_gain: NumT,
    pub min_node_hess: NumT,
    pub step_size: NumT,
    pub reg_alpha: NumT,
    pub reg_lambda: NumT,
    pub base_score: BaseScore,
    pub sub_sample: NumT,
    pub col_sample_by_tree: NumT,
    pub col_sample_by_level: NumT,
    pub boost_type: BoostType,
    pub drop_rate: NumT,
    pub drop_skip: NumT,
    pub min_drop: usize,
    pub max_drop: usize,
    pub max_brute_bins: usize,
    pub numerical_bin_type: NumericalBinType,
    pub zero_as_missing: bool,
    pub checkpoint_interval: i64,
    pub aggregation_depth: usize,
    pub seed: u64,
    pub base_model_parallelism: usize,
    pub block_size: usize,
    pub sample_blocks: bool,
    pub float_precision: FloatPrecision,

    /// Number of column shards for vertical (column-partitioned) histogram
    /// building (spec §4.2/§4.6). `1` keeps the horizontal (row-partitioned)
    /// path; values `> 1` shard `feat_ids` round-robin and all-gather
    /// gradients to every shard instead of reducing partition-local
    /// histograms.
    pub vertical_shards: usize,

    // CSV ingestion (kept from the donor's `Config`, generalized into the
    // discretizer's vocabulary: `categorical_features`/`rank_features` pick
    // which columns use which discretizer kind; all others are numeric).
    pub csv_has_header: bool,
    pub csv_delimiter: u8,
    pub categorical_features: Vec<usize>,
    pub rank_features: Vec<usize>,
}

impl Default for BoostConfig {
    fn default() -> BoostConfig {
        BoostConfig {
            max_iter: 20,
            max_depth: 5,
            max_leaves: 1000,
            max_bins: 64,
            min_gain: 0.0,
            min_node_hess: 0.0,
            step_size: 0.1,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            base_score: BaseScore::Auto,
            sub_sample: 1.0,
            col_sample_by_tree: 1.0,
            col_sample_by_level: 1.0,
            boost_type: BoostType::GBTree,
            drop_rate: 0.0,
            drop_skip: 0.5,
            min_drop: 0,
            max_drop: 50,
            max_brute_bins: 10,
            numerical_bin_type: NumericalBinType::Depth,
            zero_as_missing: false,
            checkpoint_interval: 10,
            aggregation_depth: 2,
            seed: 0,
            base_model_parallelism: 1,
            block_size: 1 << 16,
            sample_blocks: false,
            float_precision: FloatPrecision::Single,
            vertical_shards: 1,

            csv_has_header: true,
            csv_delimiter: b',',
            categorical_features: Vec::new(),
            rank_features: Vec::new(),
        }
    }
}

impl BoostConfig {
    pub fn new() -> BoostConfig {
        BoostConfig::default()
    }

    /// Validate all invariants a `ConfigurationError` should catch at set
    /// time (spec §7). Called by `BoostingDriver::new` and may be called
    /// eagerly by a front-end after each field assignment.
    pub fn validate(&self) -> GbmResult<()> {
        if self.max_iter == 0 {
            return Err(GbmError::config("max_iter must be >= 1"));
        }
        if self.max_depth == 0 {
            return Err(GbmError::config("max_depth must be >= 1"));
        }
        if self.max_leaves < 2 {
            return Err(GbmError::config("max_leaves must be >= 2"));
        }
        if self.max_bins < 2 || self.max_bins > (1 << 24) {
            return Err(GbmError::config("max_bins out of range"));
        }
        if self.reg_lambda < 0.0 || self.reg_alpha < 0.0 {
            return Err(GbmError::config("reg_lambda/reg_alpha must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.sub_sample) {
            return Err(GbmError::config("sub_sample must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.col_sample_by_tree) {
            return Err(GbmError::config("col_sample_by_tree must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.col_sample_by_level) {
            return Err(GbmError::config("col_sample_by_level must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(GbmError::config("drop_rate must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.drop_skip) {
            return Err(GbmError::config("drop_skip must be in [0, 1]"));
        }
        if self.min_drop > self.max_drop {
            return Err(GbmError::config("min_drop must be <= max_drop"));
        }
        if self.max_brute_bins == 0 {
            return Err(GbmError::config("max_brute_bins must be >= 1"));
        }
        if self.base_model_parallelism == 0 {
            return Err(GbmError::config("base_model_parallelism must be >= 1"));
        }
        if self.vertical_shards == 0 {
            return Err(GbmError::config("vertical_shards must be >= 1"));
        }
        if self.boost_type == BoostType::Goss {
            return Err(GbmError::config(
                "boost_type=goss is a planned, not-implemented mode (see spec §9)",
            ));
        }
        for &c in &self.categorical_features {
            if self.rank_features.contains(&c) {
                return Err(GbmError::config(format!(
                    "column {} listed as both categorical and rank",
                    c
                )));
            }
        }
        Ok(())
    }
}
