use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::BoostConfig;
use crate::discretizer::Discretizer;
use crate::bin_matrix::{BinMatrix, BinWidth};
use crate::error::{GbmError, GbmResult};
use crate::{NumT, NEG_INF, POS_INF};

/// Raw (pre-discretization) tabular data read from CSV, donor style
/// (`bitboost::data::Data`): columns stored feature-major, the last
/// `raw_size` columns are the label(s).
pub struct RawTable {
    names: Vec<String>,
    nrows: usize,
    ncols: usize,
    columns: Vec<Vec<NumT>>,
    limits: Vec<(NumT, NumT)>,
}

impl RawTable {
    pub fn from_csv_path<P: AsRef<Path>>(config: &BoostConfig, path: P) -> GbmResult<RawTable> {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        RawTable::from_csv_str(config, &s)
    }

    pub fn from_csv_str(config: &BoostConfig, csv_data: &str) -> GbmResult<RawTable> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(config.csv_has_header)
            .delimiter(config.csv_delimiter)
            .from_reader(csv_data.as_bytes());

        let mut ncols = 0;
        let mut nrows = 0;
        let mut columns: Vec<Vec<NumT>> = Vec::new();
        let mut limits: Vec<(NumT, NumT)> = Vec::new();
        let mut record = csv::StringRecord::new();

        loop {
            match reader.read_record(&mut record) {
                Ok(false) => break,
                Err(err) => return Err(GbmError::Csv(err)),
                Ok(true) => {
                    if nrows == 0 {
                        ncols = record.len();
                        columns.resize(ncols, Vec::new());
                        limits.resize(ncols, (POS_INF, NEG_INF));
                    }
                    if record.len() != ncols {
                        return Err(GbmError::shape(ncols, record.len()));
                    }
                    for i in 0..ncols {
                        let value: NumT = record
                            .get(i)
                            .and_then(|x| x.parse::<NumT>().ok())
                            .ok_or_else(|| GbmError::config(format!("non-numeric value at row {}, col {}", nrows, i)))?;
                        columns[i].push(value);
                        let l = limits[i];
                        limits[i] = (l.0.min(value), l.1.max(value));
                    }
                }
            }
            nrows += 1;
        }

        let mut names = vec![String::new(); ncols];
        if config.csv_has_header {
            reader
                .headers()
                .map_err(GbmError::Csv)?
                .into_iter()
                .enumerate()
                .for_each(|(i, n)| names[i].push_str(n));
        }

        Ok(RawTable { names, nrows, ncols, columns, limits })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn name(&self, c: usize) -> &str {
        &self.names[c]
    }
    pub fn limits(&self, c: usize) -> (NumT, NumT) {
        self.limits[c]
    }
    pub fn column(&self, c: usize) -> &[NumT] {
        &self.columns[c]
    }
    pub fn row(&self, r: usize) -> Vec<NumT> {
        (0..self.ncols).map(|c| self.columns[c][r]).collect()
    }
}

/// Discretized training/predict-time dataset: weights, labels, and a
/// `BinMatrix` of feature columns, bound to the `Discretizer` that produced
/// the bins (spec §3 "Instance").
pub struct Dataset {
    discretizer: Discretizer,
    bins: BinMatrix,
    weights: Vec<NumT>,
    labels: Vec<Vec<NumT>>,
    raw_size: usize,
}

impl Dataset {
    /// Build a dataset from `raw`, treating the *last* `raw_size` columns as
    /// the label vector and every other column as a feature, per the
    /// donor's "last feature is target" convention generalized to
    /// multi-output `raw_size`.
    pub fn from_raw(config: &BoostConfig, raw: &RawTable, raw_size: usize) -> GbmResult<Dataset> {
        if raw_size == 0 || raw_size >= raw.ncols() {
            return Err(GbmError::shape("raw_size < ncols", raw_size));
        }
        let nfeatures = raw.ncols() - raw_size;
        let feature_rows: Vec<Vec<NumT>> = (0..raw.nrows())
            .map(|r| (0..nfeatures).map(|c| raw.column(c)[r]).collect())
            .collect();

        let discretizer = Discretizer::fit(&feature_rows, config)?;
        let width = BinWidth::smallest_for(discretizer.max_num_bins());
        let mut bins = BinMatrix::zeros(width, raw.nrows(), nfeatures);
        for (r, frow) in feature_rows.iter().enumerate() {
            let encoded = discretizer.transform(frow)?;
            for (c, &v) in encoded.iter().enumerate() {
                bins.set(r, c, v)?;
            }
        }

        let weights = vec![1.0; raw.nrows()];
        let labels: Vec<Vec<NumT>> = (0..raw.nrows())
            .map(|r| (nfeatures..raw.ncols()).map(|c| raw.column(c)[r]).collect())
            .collect();

        Ok(Dataset { discretizer, bins, weights, labels, raw_size })
    }

    pub fn nrows(&self) -> usize {
        self.bins.nrows()
    }
    pub fn nfeatures(&self) -> usize {
        self.bins.ncols()
    }
    pub fn raw_size(&self) -> usize {
        self.raw_size
    }
    pub fn discretizer(&self) -> &Discretizer {
        &self.discretizer
    }
    pub fn bins(&self) -> &BinMatrix {
        &self.bins
    }
    pub fn weight(&self, row: usize) -> NumT {
        self.weights[row]
    }
    pub fn label(&self, row: usize) -> &[NumT] {
        &self.labels[row]
    }
    pub fn label_mean(&self) -> Vec<NumT> {
        let mut sum = vec![0.0; self.raw_size];
        let mut wsum = 0.0;
        for r in 0..self.nrows() {
            let w = self.weights[r];
            wsum += w;
            for k in 0..self.raw_size {
                sum[k] += w * self.labels[r][k];
            }
        }
        if wsum > 0.0 {
            sum.iter_mut().for_each(|s| *s /= wsum);
        }
        sum
    }
}
