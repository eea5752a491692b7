//! Feature discretizer (spec §4.1): converts continuous, categorical and
//! rank columns into compact integer bin indices. Every column reserves bin
//! index 0 for "missing" (spec §4.3's missing-bin split candidate needs it
//! uniformly, not just for categoricals), so a numeric column with `k` data
//! buckets has `k + 1` total bins.

use fnv::FnvHashMap;

use crate::binner::Binner;
use crate::config::{BoostConfig, NumericalBinType};
use crate::error::{GbmError, GbmResult};
use crate::{into_cat, CatT, NumT, NEG_INF, POS_INF};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    NumericQuantile,
    NumericWidth,
    Categorical,
    Rank,
}

#[derive(Debug, Clone)]
pub enum ColumnSummary {
    /// `thresholds[i]` separates data-bucket `i` from `i+1`. `k-1` thresholds
    /// make `k` data buckets, `k+1` total bins once the missing bin is added.
    NumericQuantile { thresholds: Vec<NumT> },
    NumericWidth { min: NumT, max: NumT, bin_width: NumT, ndata_bins: usize },
    /// Dense `raw -> code` map; codes `1..=ndata_codes`. `catch_all` (when
    /// set) absorbs both unseen raw values and the categories that lost the
    /// cut when the column's cardinality exceeded `max_bins - 1`.
    Categorical { code_of: FnvHashMap<CatT, CatT>, ndata_codes: usize, catch_all: Option<CatT> },
    Rank { code_of: FnvHashMap<CatT, CatT>, ndata_codes: usize, catch_all: Option<CatT> },
}

impl ColumnSummary {
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnSummary::NumericQuantile { .. } => ColumnType::NumericQuantile,
            ColumnSummary::NumericWidth { .. } => ColumnType::NumericWidth,
            ColumnSummary::Categorical { .. } => ColumnType::Categorical,
            ColumnSummary::Rank { .. } => ColumnType::Rank,
        }
    }

    /// Total number of bins, missing bin (index 0) included.
    pub fn num_bins(&self) -> usize {
        match self {
            ColumnSummary::NumericQuantile { thresholds } => thresholds.len() + 2,
            ColumnSummary::NumericWidth { ndata_bins, .. } => ndata_bins + 1,
            ColumnSummary::Categorical { ndata_codes, catch_all, .. } => {
                ndata_codes + if catch_all.is_some() { 2 } else { 1 }
            }
            ColumnSummary::Rank { ndata_codes, catch_all, .. } => {
                ndata_codes + if catch_all.is_some() { 2 } else { 1 }
            }
        }
    }

    /// Logical-schema serialization of "thresholds-or-categories" (spec §6
    /// model persistence table). Plain-text, not a binary wire format --
    /// spec §1 explicitly scopes the wire framing itself out.
    pub fn to_spec_string(&self) -> String {
        match self {
            ColumnSummary::NumericQuantile { thresholds } => {
                thresholds.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",")
            }
            ColumnSummary::NumericWidth { min, max, bin_width, ndata_bins } => {
                format!("{},{},{},{}", min, max, bin_width, ndata_bins)
            }
            ColumnSummary::Categorical { code_of, ndata_codes, catch_all } => {
                serialize_cat_map(code_of, *ndata_codes, *catch_all)
            }
            ColumnSummary::Rank { code_of, ndata_codes, catch_all } => {
                serialize_cat_map(code_of, *ndata_codes, *catch_all)
            }
        }
    }

    /// Inverse of `to_spec_string`, keyed by the persisted column type.
    pub fn from_spec_string(column_type: ColumnType, s: &str) -> GbmResult<ColumnSummary> {
        let bad = || GbmError::shape("well-formed discretizer spec string", s.to_string());
        match column_type {
            ColumnType::NumericQuantile => {
                let thresholds = if s.is_empty() {
                    Vec::new()
                } else {
                    s.split(',').map(|p| p.parse::<NumT>().map_err(|_| bad())).collect::<GbmResult<_>>()?
                };
                Ok(ColumnSummary::NumericQuantile { thresholds })
            }
            ColumnType::NumericWidth => {
                let parts: Vec<&str> = s.split(',').collect();
                if parts.len() != 4 {
                    return Err(bad());
                }
                let min = parts[0].parse::<NumT>().map_err(|_| bad())?;
                let max = parts[1].parse::<NumT>().map_err(|_| bad())?;
                let bin_width = parts[2].parse::<NumT>().map_err(|_| bad())?;
                let ndata_bins = parts[3].parse::<usize>().map_err(|_| bad())?;
                Ok(ColumnSummary::NumericWidth { min, max, bin_width, ndata_bins })
            }
            ColumnType::Categorical => {
                let (code_of, ndata_codes, catch_all) = deserialize_cat_map(s)?;
                Ok(ColumnSummary::Categorical { code_of, ndata_codes, catch_all })
            }
            ColumnType::Rank => {
                let (code_of, ndata_codes, catch_all) = deserialize_cat_map(s)?;
                Ok(ColumnSummary::Rank { code_of, ndata_codes, catch_all })
            }
        }
    }
}

fn serialize_cat_map(code_of: &FnvHashMap<CatT, CatT>, ndata_codes: usize, catch_all: Option<CatT>) -> String {
    let catch_all_str = catch_all.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string());
    let mut entries: Vec<(CatT, CatT)> = code_of.iter().map(|(&k, &v)| (k, v)).collect();
    entries.sort_unstable_by_key(|&(raw, _)| raw);
    let map_str = entries.iter().map(|(raw, code)| format!("{}={}", raw, code)).collect::<Vec<_>>().join(",");
    format!("{};{};{}", ndata_codes, catch_all_str, map_str)
}

fn deserialize_cat_map(s: &str) -> GbmResult<(FnvHashMap<CatT, CatT>, usize, Option<CatT>)> {
    let bad = || GbmError::shape("well-formed categorical spec string", s.to_string());
    let mut parts = s.splitn(3, ';');
    let ndata_codes = parts.next().ok_or_else(bad)?.parse::<usize>().map_err(|_| bad())?;
    let catch_all_str = parts.next().ok_or_else(bad)?;
    let catch_all = if catch_all_str == "none" { None } else { Some(catch_all_str.parse::<CatT>().map_err(|_| bad())?) };
    let map_str = parts.next().unwrap_or("");
    let mut code_of = FnvHashMap::default();
    if !map_str.is_empty() {
        for entry in map_str.split(',') {
            let mut kv = entry.splitn(2, '=');
            let raw = kv.next().ok_or_else(bad)?.parse::<CatT>().map_err(|_| bad())?;
            let code = kv.next().ok_or_else(bad)?.parse::<CatT>().map_err(|_| bad())?;
            code_of.insert(raw, code);
        }
    }
    Ok((code_of, ndata_codes, catch_all))
}

fn is_missing(v: NumT, zero_as_missing: bool) -> bool {
    v.is_nan() || (zero_as_missing && v == 0.0)
}

/// Ordered sequence of per-column summaries, fit once and reused to
/// transform every row deterministically (spec §4.1 contract).
#[derive(Debug, Clone)]
pub struct Discretizer {
    columns: Vec<ColumnSummary>,
    zero_as_missing: bool,
    /// Fraction of fitting rows that mapped to the missing bin (index 0),
    /// per column -- the "sparsity" field of spec §6's discretizer
    /// persistence table.
    sparsity: Vec<f64>,
}

impl Discretizer {
    /// Rebuild a `Discretizer` from already-fit column summaries, e.g. when
    /// reconstructing one from a persisted `DiscretizerColumn` table
    /// (`Model::from_tables`). Sparsity is not itself round-tripped through
    /// bin semantics, so callers loading from persistence supply it back
    /// verbatim from the table; callers building one fresh (outside `fit`)
    /// may pass zeros.
    pub fn from_columns(columns: Vec<ColumnSummary>, zero_as_missing: bool, sparsity: Vec<f64>) -> Discretizer {
        debug_assert_eq!(columns.len(), sparsity.len());
        Discretizer { columns, zero_as_missing, sparsity }
    }

    pub fn ncolumns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_bins(&self, col: usize) -> usize {
        self.columns[col].num_bins()
    }

    pub fn column_type(&self, col: usize) -> ColumnType {
        self.columns[col].column_type()
    }

    pub fn column_summary(&self, col: usize) -> &ColumnSummary {
        &self.columns[col]
    }

    /// Fraction of fit-time rows that fell into the missing bin for `col`.
    pub fn sparsity(&self, col: usize) -> f64 {
        self.sparsity[col]
    }

    pub fn zero_as_missing(&self) -> bool {
        self.zero_as_missing
    }

    pub fn max_num_bins(&self) -> usize {
        self.columns.iter().map(|c| c.num_bins()).max().unwrap_or(1)
    }

    /// Fit column summaries from a single pass over `rows`.
    ///
    /// Internally this is two sub-passes (min/max + frequency counting,
    /// then quantile sketching) over the same in-memory slice, which is the
    /// distributed tree-reduce of spec §4.1 collapsed onto one partition;
    /// `merge` below is what a real partitioned caller would tree-reduce
    /// with.
    pub fn fit(rows: &[Vec<NumT>], config: &BoostConfig) -> GbmResult<Discretizer> {
        let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
        for (i, r) in rows.iter().enumerate() {
            if r.len() != ncols {
                return Err(GbmError::shape(ncols, (i, r.len())));
            }
        }

        let mut columns = Vec::with_capacity(ncols);
        let mut sparsity = Vec::with_capacity(ncols);
        for c in 0..ncols {
            let is_cat = config.categorical_features.contains(&c);
            let is_rank = config.rank_features.contains(&c);
            let values: Vec<NumT> = rows.iter().map(|r| r[c]).collect();

            let (summary, nmissing) = if is_cat {
                fit_categorical(&values, config, false)?
            } else if is_rank {
                fit_categorical(&values, config, true)?
            } else {
                fit_numeric(&values, config)?
            };
            columns.push(summary);
            sparsity.push(nmissing as f64 / values.len().max(1) as f64);
        }

        Ok(Discretizer { columns, zero_as_missing: config.zero_as_missing, sparsity })
    }

    /// Transform one row into bin indices; never produces an index `>=
    /// num_bins(col)` (spec §4.1 invariant).
    pub fn transform(&self, row: &[NumT]) -> GbmResult<Vec<u32>> {
        if row.len() != self.columns.len() {
            return Err(GbmError::shape(self.columns.len(), row.len()));
        }
        let mut out = Vec::with_capacity(row.len());
        for (v, col) in row.iter().zip(self.columns.iter()) {
            out.push(transform_one(*v, col, self.zero_as_missing));
        }
        Ok(out)
    }
}

fn transform_one(v: NumT, col: &ColumnSummary, zero_as_missing: bool) -> u32 {
    if is_missing(v, zero_as_missing) {
        return 0;
    }
    match col {
        ColumnSummary::NumericQuantile { thresholds } => {
            let data_bin = match thresholds.binary_search_by(|t| t.partial_cmp(&v).unwrap()) {
                Ok(i) => i + 1,
                Err(i) => i,
            };
            (data_bin + 1) as u32
        }
        ColumnSummary::NumericWidth { min, bin_width, ndata_bins, .. } => {
            let idx = ((v - min) / bin_width).floor();
            let idx = if idx.is_nan() { 0.0 } else { idx };
            let idx = (idx as isize).max(0).min(*ndata_bins as isize - 1);
            (idx as u32) + 1
        }
        ColumnSummary::Categorical { code_of, catch_all, .. } => {
            let cat = into_cat(v.max(0.0).round());
            code_of.get(&cat).copied().or(*catch_all).unwrap_or(0)
        }
        ColumnSummary::Rank { code_of, catch_all, .. } => {
            let cat = into_cat(v.max(0.0).round());
            code_of.get(&cat).copied().or(*catch_all).unwrap_or(0)
        }
    }
}

fn fit_numeric(values: &[NumT], config: &BoostConfig) -> GbmResult<(ColumnSummary, usize)> {
    let ndata_bins_target = (config.max_bins.max(2) - 1).max(1);
    let (mut lo, mut hi) = (POS_INF, NEG_INF);
    let mut nmissing = 0usize;
    for &v in values {
        if v.is_nan() || (config.zero_as_missing && v == 0.0) {
            nmissing += 1;
            continue;
        }
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() || !hi.is_finite() {
        lo = 0.0;
        hi = 0.0;
    }

    match config.numerical_bin_type {
        NumericalBinType::Width => {
            let bin_width = if hi > lo { (hi - lo) / ndata_bins_target as NumT } else { 1.0 };
            Ok((ColumnSummary::NumericWidth { min: lo, max: hi, bin_width, ndata_bins: ndata_bins_target }, nmissing))
        }
        NumericalBinType::Depth => {
            // Oversampled count sketch, then extract `ndata_bins_target - 1`
            // approximately-equal-weight thresholds (greedy-merge quantile
            // sketch, donor style: `bitboost::data::Dataset::preprocess_num`).
            let sketch_width = (ndata_bins_target * 10).max(16);
            let mut buf = vec![0u32; sketch_width];
            let mut n = 0u32;
            {
                let mut binner = Binner::new(&mut buf, (lo, hi));
                let combiner = |b: &mut u32, d: u32| *b += d;
                for &v in values {
                    if v.is_nan() || (config.zero_as_missing && v == 0.0) {
                        continue;
                    }
                    binner.insert(v, 1, combiner);
                    n += 1;
                }
            }
            if n == 0 || ndata_bins_target <= 1 {
                return Ok((ColumnSummary::NumericQuantile { thresholds: Vec::new() }, nmissing));
            }
            let binner = Binner::new(&mut buf, (lo, hi));
            let step = n as NumT / ndata_bins_target as NumT;
            let ranks = (1..ndata_bins_target).map(|i| (i as NumT * step).round() as u32);
            let mut thresholds = Vec::with_capacity(ndata_bins_target - 1);
            let mut last = None;
            for bin in binner.rank_iter(ranks, |b| *b) {
                if last == Some(bin) {
                    continue;
                }
                last = Some(bin);
                thresholds.push(binner.bin_representative(bin));
            }
            thresholds.dedup();
            Ok((ColumnSummary::NumericQuantile { thresholds }, nmissing))
        }
    }
}

fn fit_categorical(values: &[NumT], config: &BoostConfig, is_rank: bool) -> GbmResult<(ColumnSummary, usize)> {
    let mut freq: FnvHashMap<CatT, u64> = FnvHashMap::default();
    let mut nmissing = 0usize;
    for &v in values {
        if v.is_nan() || (config.zero_as_missing && v == 0.0) {
            nmissing += 1;
            continue;
        }
        if v < 0.0 || v.round() != v {
            return Err(GbmError::config(format!("non-integer categorical value {}", v)));
        }
        *freq.entry(into_cat(v)).or_insert(0) += 1;
    }

    let cap = (config.max_bins.max(2) - 1).max(1); // slots available excluding missing
    let mut cats: Vec<CatT> = freq.keys().copied().collect();
    if is_rank {
        cats.sort_unstable();
    } else {
        cats.sort_by(|a, b| freq[b].cmp(&freq[a]).then(a.cmp(b)));
    }

    let (code_of, ndata_codes, catch_all) = if cats.len() <= cap {
        let mut map = FnvHashMap::default();
        let mut ordered = cats.clone();
        if is_rank {
            ordered.sort_unstable();
        }
        for (i, &c) in ordered.iter().enumerate() {
            map.insert(c, (i + 1) as CatT);
        }
        (map, ordered.len(), None)
    } else {
        let keep = cap - 1;
        let mut map = FnvHashMap::default();
        let catch_all_code = cap as CatT;
        if is_rank {
            // preserve ordinal order: bucket consecutive sorted values into
            // `keep` roughly-equal groups, last extra values fold into the
            // catch-all bucket.
            let group_size = (cats.len() + keep - 1) / keep;
            for (i, &c) in cats.iter().enumerate() {
                let group = (i / group_size).min(keep - 1);
                map.insert(c, (group + 1) as CatT);
            }
        } else {
            for (i, &c) in cats.iter().take(keep).enumerate() {
                map.insert(c, (i + 1) as CatT);
            }
        }
        (map, keep, Some(catch_all_code))
    };

    if is_rank {
        Ok((ColumnSummary::Rank { code_of, ndata_codes, catch_all }, nmissing))
    } else {
        Ok((ColumnSummary::Categorical { code_of, ndata_codes, catch_all }, nmissing))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg() -> BoostConfig {
        let mut c = BoostConfig::new();
        c.max_bins = 8;
        c
    }

    #[test]
    fn numeric_width_basic() {
        let mut c = cfg();
        c.numerical_bin_type = NumericalBinType::Width;
        let rows: Vec<Vec<NumT>> = (0..10).map(|i| vec![i as NumT]).collect();
        let d = Discretizer::fit(&rows, &c).unwrap();
        for r in &rows {
            let bins = d.transform(r).unwrap();
            assert!((bins[0] as usize) < d.num_bins(0));
        }
    }

    #[test]
    fn categorical_unseen_goes_missing_or_catchall() {
        let mut c = cfg();
        c.categorical_features = vec![0];
        let rows: Vec<Vec<NumT>> = vec![vec![1.0], vec![2.0], vec![3.0]];
        let d = Discretizer::fit(&rows, &c).unwrap();
        let bins = d.transform(&[99.0]).unwrap();
        assert!((bins[0] as usize) < d.num_bins(0));
    }

    #[test]
    fn categorical_overflow_uses_catch_all() {
        let mut c = cfg();
        c.max_bins = 4; // cap=3 slots excluding missing
        c.categorical_features = vec![0];
        let rows: Vec<Vec<NumT>> = (0..10).map(|i| vec![i as NumT]).collect();
        let d = Discretizer::fit(&rows, &c).unwrap();
        for r in &rows {
            let bins = d.transform(r).unwrap();
            assert!((bins[0] as usize) < d.num_bins(0));
            assert!(d.num_bins(0) <= c.max_bins);
        }
    }

    #[test]
    fn missing_always_zero() {
        let mut c = cfg();
        let rows: Vec<Vec<NumT>> = (0..10).map(|i| vec![i as NumT]).collect();
        let d = Discretizer::fit(&rows, &c).unwrap();
        let bins = d.transform(&[NumT::NAN]).unwrap();
        assert_eq!(bins[0], 0);
    }

    #[test]
    fn sparsity_tracks_missing_fraction() {
        let mut c = cfg();
        c.zero_as_missing = true;
        let rows: Vec<Vec<NumT>> = vec![vec![0.0], vec![0.0], vec![1.0], vec![2.0]];
        let d = Discretizer::fit(&rows, &c).unwrap();
        assert!((d.sparsity(0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn column_summary_spec_string_round_trips() {
        let mut c = cfg();
        c.categorical_features = vec![0];
        c.max_bins = 4;
        let rows: Vec<Vec<NumT>> = (0..10).map(|i| vec![i as NumT]).collect();
        let d = Discretizer::fit(&rows, &c).unwrap();
        let summary = d.column_summary(0).clone();
        let spec = summary.to_spec_string();
        let restored = ColumnSummary::from_spec_string(summary.column_type(), &spec).unwrap();
        assert_eq!(restored.num_bins(), summary.num_bins());

        let rebuilt = Discretizer::from_columns(vec![restored], false, vec![d.sparsity(0)]);
        for r in &rows {
            assert_eq!(d.transform(r).unwrap(), rebuilt.transform(r).unwrap());
        }
    }

    #[test]
    fn numeric_quantile_spec_string_round_trips() {
        let c = cfg();
        let rows: Vec<Vec<NumT>> = (0..20).map(|i| vec![i as NumT]).collect();
        let d = Discretizer::fit(&rows, &c).unwrap();
        let summary = d.column_summary(0).clone();
        let spec = summary.to_spec_string();
        let restored = ColumnSummary::from_spec_string(summary.column_type(), &spec).unwrap();
        let rebuilt = Discretizer::from_columns(vec![restored], false, vec![0.0]);
        for r in &rows {
            assert_eq!(d.transform(r).unwrap(), rebuilt.transform(r).unwrap());
        }
    }
}
