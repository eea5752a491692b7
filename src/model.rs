//! Ensemble representation, predictor and logical persistence schema (spec
//! §4.7, §6 "Model persistence (logical)").

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::discretizer::{ColumnSummary, ColumnType, Discretizer};
use crate::error::{GbmError, GbmResult};
use crate::split::{SplitKind, SplitPayload};
use crate::tree::{NodeData, Tree};
use crate::NumT;

/// `len(trees) == len(weights)`; under DART `len(trees) % raw_size == 0`
/// (spec §3 "Ensemble / Model").
#[derive(Clone)]
pub struct Model {
    pub trees: Vec<Tree>,
    pub weights: Vec<NumT>,
    pub base_score: Vec<NumT>,
    pub raw_size: usize,
    pub discretizer: Discretizer,
    /// Driver's RNG draw counter as of the last completed iteration, carried
    /// along so `BoostingDriver::with_initial_model` resumes the seed stream
    /// instead of restarting it (spec §8 scenario 6: a 10+10 round
    /// continuation must equal one 20-round run under the same seed).
    pub seed_counter: u64,
}

impl Model {
    pub fn new(base_score: Vec<NumT>, raw_size: usize, discretizer: Discretizer) -> Model {
        Model { trees: Vec::new(), weights: Vec::new(), base_score, raw_size, discretizer, seed_counter: 0 }
    }

    pub fn check_invariants(&self) -> GbmResult<()> {
        if self.trees.len() != self.weights.len() {
            return Err(GbmError::shape(self.trees.len(), self.weights.len()));
        }
        Ok(())
    }

    /// `predict(row, firstN)`: discretize, start from `base_score`, add the
    /// first `first_n` trees' weighted contributions into their respective
    /// output slots.
    pub fn predict(&self, row: &[NumT], first_n: usize) -> GbmResult<Vec<NumT>> {
        let bins = self.discretizer.transform(row)?;
        let mut raw = self.base_score.clone();
        let n = first_n.min(self.trees.len());
        for i in 0..n {
            let t = &self.trees[i];
            raw[t.output_index % self.raw_size] += self.weights[i] * t.predict_scalar(&bins);
        }
        Ok(raw)
    }

    /// Per-tree leaf id, optionally one-hot expanded by cumulative leaf
    /// counts across the first `first_n` trees.
    pub fn leaf(&self, row: &[NumT], first_n: usize, one_hot: bool) -> GbmResult<Vec<usize>> {
        let bins = self.discretizer.transform(row)?;
        let n = first_n.min(self.trees.len());
        if !one_hot {
            return Ok((0..n).map(|i| self.trees[i].leaf_id(&bins)).collect());
        }
        let mut out = Vec::with_capacity(n);
        let mut offset = 0;
        for i in 0..n {
            out.push(offset + self.trees[i].leaf_id(&bins));
            offset += self.trees[i].nodes.len();
        }
        Ok(out)
    }

    /// Sum of `weight * gain` per feature across the first `n` trees,
    /// normalized to sum to 1.
    pub fn feature_importance(&self, first_n: usize) -> HashMap<usize, f64> {
        let mut acc: HashMap<usize, f64> = HashMap::new();
        let n = first_n.min(self.trees.len());
        for i in 0..n {
            self.trees[i].importance_contribution(self.weights[i], &mut acc);
        }
        let total: f64 = acc.values().sum();
        if total > 0.0 {
            for v in acc.values_mut() {
                *v /= total;
            }
        }
        acc
    }

    pub fn to_tables(&self) -> ModelTables {
        let discretizer = (0..self.discretizer.ncolumns())
            .map(|c| DiscretizerColumn {
                column: c,
                column_type: column_type_name(self.discretizer.column_type(c)).to_string(),
                spec: self.discretizer.column_summary(c).to_spec_string(),
                num_bins: self.discretizer.num_bins(c),
                sparsity: self.discretizer.sparsity(c),
            })
            .collect();
        let weights = self
            .weights
            .iter()
            .enumerate()
            .map(|(i, &w)| WeightRow { tree_index: i, weight: w })
            .collect();
        let trees = self
            .trees
            .iter()
            .enumerate()
            .map(|(i, t)| TreeRow { tree_index: i, output_index: t.output_index, nodes: tree_nodes(t) })
            .collect();
        let mut extra = Vec::new();
        for (k, &v) in self.base_score.iter().enumerate() {
            extra.push(ExtraRow { key: format!("base_score[{}]", k), value: v.to_string() });
        }
        extra.push(ExtraRow { key: "raw_size".to_string(), value: self.raw_size.to_string() });
        extra.push(ExtraRow { key: "zero_as_missing".to_string(), value: self.discretizer.zero_as_missing().to_string() });

        ModelTables { discretizer, weights, trees, extra }
    }

    /// Inverse of `to_tables`: rebuild a fully working `Model` -- including a
    /// `Discretizer` that predicts identically to the one that produced the
    /// tables -- from the logical persistence schema (spec §6).
    pub fn from_tables(tables: &ModelTables) -> GbmResult<Model> {
        Model::verify_tree_indices(tables)?;

        let extra_value = |key: &str| -> GbmResult<&str> {
            tables
                .extra
                .iter()
                .find(|e| e.key == key)
                .map(|e| e.value.as_str())
                .ok_or_else(|| GbmError::shape(format!("extra key `{}`", key), "missing"))
        };
        let raw_size_str = extra_value("raw_size")?;
        let raw_size: usize = raw_size_str.parse().map_err(|_| GbmError::shape("numeric raw_size", raw_size_str))?;
        let zero_as_missing_str = extra_value("zero_as_missing")?;
        let zero_as_missing: bool = zero_as_missing_str
            .parse()
            .map_err(|_| GbmError::shape("boolean zero_as_missing", zero_as_missing_str))?;

        let mut discretizer_columns: Vec<Option<ColumnSummary>> = vec![None; tables.discretizer.len()];
        let mut sparsity = vec![0.0; tables.discretizer.len()];
        for col in &tables.discretizer {
            let column_type = column_type_from_name(&col.column_type)?;
            discretizer_columns[col.column] = Some(ColumnSummary::from_spec_string(column_type, &col.spec)?);
            sparsity[col.column] = col.sparsity;
        }
        let discretizer_columns = discretizer_columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.ok_or_else(|| GbmError::shape("discretizer column", i)))
            .collect::<GbmResult<Vec<_>>>()?;
        let discretizer = Discretizer::from_columns(discretizer_columns, zero_as_missing, sparsity);

        let mut base_score = vec![0.0 as NumT; raw_size];
        for e in &tables.extra {
            if let Some(rest) = e.key.strip_prefix("base_score[").and_then(|r| r.strip_suffix(']')) {
                let idx: usize = rest.parse().map_err(|_| GbmError::shape("base_score index", &e.key))?;
                if idx >= raw_size {
                    return Err(GbmError::shape("base_score index < raw_size", idx));
                }
                base_score[idx] = e.value.parse().map_err(|_| GbmError::shape("numeric base_score", &e.value))?;
            }
        }

        let mut weights = vec![0.0 as NumT; tables.weights.len()];
        for w in &tables.weights {
            if w.tree_index >= weights.len() {
                return Err(GbmError::shape("weight treeIndex < n", w.tree_index));
            }
            weights[w.tree_index] = w.weight;
        }

        let mut trees: Vec<Option<Tree>> = vec![None; tables.trees.len()];
        for t in &tables.trees {
            trees[t.tree_index] = Some(tree_from_rows(t.output_index, &t.nodes)?);
        }
        let trees = trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| t.ok_or_else(|| GbmError::shape("tree at treeIndex", i)))
            .collect::<GbmResult<Vec<_>>>()?;

        if trees.len() != weights.len() {
            return Err(GbmError::shape(trees.len(), weights.len()));
        }

        Ok(Model { trees, weights, base_score, raw_size, discretizer, seed_counter: 0 })
    }

    /// Serialize via the logical tables to a JSON string (spec §6's
    /// persistence schema, wire framing left to `serde_json`).
    pub fn to_json(&self) -> GbmResult<String> {
        Ok(serde_json::to_string(&self.to_tables())?)
    }

    pub fn from_json(s: &str) -> GbmResult<Model> {
        let tables: ModelTables = serde_json::from_str(s)?;
        Model::from_tables(&tables)
    }

    /// Verify the persisted `treeIndex` set is contiguous, unique and
    /// covers `[0, n)` (spec §7).
    pub fn verify_tree_indices(tables: &ModelTables) -> GbmResult<()> {
        let mut seen = vec![false; tables.trees.len()];
        for t in &tables.trees {
            if t.tree_index >= tables.trees.len() || seen[t.tree_index] {
                return Err(GbmError::shape("contiguous unique treeIndex", t.tree_index));
            }
            seen[t.tree_index] = true;
        }
        Ok(())
    }
}

fn column_type_from_name(name: &str) -> GbmResult<ColumnType> {
    match name {
        "numeric-quantile" => Ok(ColumnType::NumericQuantile),
        "numeric-width" => Ok(ColumnType::NumericWidth),
        "categorical" => Ok(ColumnType::Categorical),
        "rank" => Ok(ColumnType::Rank),
        other => Err(GbmError::shape("known discretizer column_type", other.to_string())),
    }
}

fn tree_from_rows(output_index: usize, rows: &[NodeRow]) -> GbmResult<Tree> {
    let bad = |id: usize| GbmError::shape("complete node row", id);
    let mut nodes = Vec::with_capacity(rows.len());
    for row in rows {
        let node = if row.is_leaf {
            NodeData::Leaf { value: row.leaf_value.ok_or_else(|| bad(row.id))? }
        } else {
            let feature = row.feature_id.ok_or_else(|| bad(row.id))?;
            let gain = row.gain.ok_or_else(|| bad(row.id))?;
            let left = row.left_id.ok_or_else(|| bad(row.id))?;
            let right = row.right_id.ok_or_else(|| bad(row.id))?;
            let default_left = match row.default_dir.as_deref() {
                Some("left") => true,
                Some("right") => false,
                _ => return Err(bad(row.id)),
            };
            let kind_str = row.split_kind.as_deref().ok_or_else(|| bad(row.id))?;
            let payload_str = row.split_payload.as_deref().ok_or_else(|| bad(row.id))?;
            let (kind, payload) = match kind_str {
                "numeric-threshold" => (
                    SplitKind::NumericThreshold,
                    SplitPayload::NumericThreshold {
                        bin_threshold: payload_str.parse().map_err(|_| bad(row.id))?,
                    },
                ),
                "categorical-set" => {
                    let left_bins: HashSet<u32> = if payload_str.is_empty() {
                        HashSet::new()
                    } else {
                        payload_str
                            .split(',')
                            .map(|s| s.parse::<u32>().map_err(|_| bad(row.id)))
                            .collect::<GbmResult<_>>()?
                    };
                    (SplitKind::CategoricalSet, SplitPayload::CategoricalSet { left_bins })
                }
                _ => return Err(bad(row.id)),
            };
            NodeData::Split { feature, kind, payload, gain, left, right, default_left }
        };
        nodes.push(node);
    }
    Ok(Tree { nodes, output_index })
}

fn tree_nodes(tree: &Tree) -> Vec<NodeRow> {
    tree.nodes
        .iter()
        .enumerate()
        .map(|(id, n)| match n {
            NodeData::Leaf { value } => NodeRow {
                id,
                is_leaf: true,
                feature_id: None,
                split_kind: None,
                split_payload: None,
                gain: None,
                left_id: None,
                right_id: None,
                default_dir: None,
                leaf_value: Some(*value),
            },
            NodeData::Split { feature, kind, payload, gain, left, right, default_left } => NodeRow {
                id,
                is_leaf: false,
                feature_id: Some(*feature),
                split_kind: Some(match kind {
                    SplitKind::NumericThreshold => "numeric-threshold".to_string(),
                    SplitKind::CategoricalSet => "categorical-set".to_string(),
                }),
                split_payload: Some(match payload {
                    SplitPayload::NumericThreshold { bin_threshold } => bin_threshold.to_string(),
                    SplitPayload::CategoricalSet { left_bins } => {
                        let mut v: Vec<u32> = left_bins.iter().copied().collect();
                        v.sort_unstable();
                        v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(",")
                    }
                }),
                gain: Some(*gain),
                left_id: Some(*left),
                right_id: Some(*right),
                default_dir: Some(if *default_left { "left".to_string() } else { "right".to_string() }),
                leaf_value: None,
            },
        })
        .collect()
}

// ---------------------------------------------------------------------------------------------
// Logical persistence tables (spec §6). Wire framing is explicitly not
// specified (spec §1 Non-goals); these are plain `serde` structs meant to be
// serialized with `serde_json` by a front-end, not a binary format this
// core mandates.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscretizerColumn {
    pub column: usize,
    pub column_type: String,
    /// Thresholds-or-categories, encoded by `ColumnSummary::to_spec_string`
    /// (spec §6: the discretizer table's "thresholds-or-categories" field).
    pub spec: String,
    pub num_bins: usize,
    pub sparsity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub tree_index: usize,
    pub weight: NumT,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: usize,
    pub is_leaf: bool,
    pub feature_id: Option<usize>,
    pub split_kind: Option<String>,
    pub split_payload: Option<String>,
    pub gain: Option<NumT>,
    pub left_id: Option<usize>,
    pub right_id: Option<usize>,
    pub default_dir: Option<String>,
    pub leaf_value: Option<NumT>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRow {
    pub tree_index: usize,
    pub output_index: usize,
    pub nodes: Vec<NodeRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraRow {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTables {
    pub discretizer: Vec<DiscretizerColumn>,
    pub weights: Vec<WeightRow>,
    pub trees: Vec<TreeRow>,
    pub extra: Vec<ExtraRow>,
}

pub fn column_type_name(t: ColumnType) -> &'static str {
    match t {
        ColumnType::NumericQuantile => "numeric-quantile",
        ColumnType::NumericWidth => "numeric-width",
        ColumnType::Categorical => "categorical",
        ColumnType::Rank => "rank",
    }
}

pub fn describe_column(s: &ColumnSummary) -> (&'static str, usize) {
    (column_type_name(s.column_type()), s.num_bins())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BoostConfig;

    #[test]
    fn empty_model_invariants_hold() {
        let config = BoostConfig::new();
        let rows: Vec<Vec<NumT>> = vec![vec![1.0], vec![2.0]];
        let discretizer = Discretizer::fit(&rows, &config).unwrap();
        let model = Model::new(vec![0.0], 1, discretizer);
        model.check_invariants().unwrap();
        assert_eq!(model.trees.len(), model.weights.len());
    }

    #[test]
    fn verify_tree_indices_rejects_gaps() {
        let tables = ModelTables {
            discretizer: Vec::new(),
            weights: Vec::new(),
            trees: vec![
                TreeRow { tree_index: 0, output_index: 0, nodes: Vec::new() },
                TreeRow { tree_index: 2, output_index: 0, nodes: Vec::new() },
            ],
            extra: Vec::new(),
        };
        assert!(Model::verify_tree_indices(&tables).is_err());
    }

    fn trained_model() -> (Model, Vec<Vec<NumT>>) {
        use crate::boost::BoostingDriver;
        use crate::data::{Dataset, RawTable};
        use crate::objective::SquaredError;

        let mut config = BoostConfig::new();
        config.csv_has_header = false;
        config.max_bins = 8;
        config.max_depth = 2;
        config.max_iter = 5;
        config.categorical_features = vec![1];
        let csv = "0,1,3\n1,2,5\n2,1,7\n3,2,9\n4,1,11\n5,2,13\n6,1,15\n7,2,17\n";
        let raw = RawTable::from_csv_str(&config, csv).unwrap();
        let ds = Dataset::from_raw(&config, &raw, 1).unwrap();
        let obj = SquaredError;
        let mut driver = BoostingDriver::new(config, &ds, &obj).unwrap();
        driver.train(&mut []).unwrap();

        let rows = vec![vec![0.0, 1.0], vec![3.0, 2.0], vec![7.0, 1.0], vec![NumT::NAN, 2.0]];
        (driver.model().clone(), rows)
    }

    #[test]
    fn from_tables_round_trips_predictions() {
        let (model, rows) = trained_model();
        let tables = model.to_tables();
        let restored = Model::from_tables(&tables).unwrap();
        assert_eq!(restored.to_tables(), tables);
        for row in &rows {
            let expected = model.predict(row, model.trees.len()).unwrap();
            let actual = restored.predict(row, restored.trees.len()).unwrap();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn json_round_trips_predictions() {
        let (model, rows) = trained_model();
        let json = model.to_json().unwrap();
        let restored = Model::from_json(&json).unwrap();
        for row in &rows {
            let expected = model.predict(row, model.trees.len()).unwrap();
            let actual = restored.predict(row, restored.trees.len()).unwrap();
            assert_eq!(expected, actual);
        }
    }
}
