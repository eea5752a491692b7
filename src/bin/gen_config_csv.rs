//! `gbm_gen_config_csv`: dump `BoostConfig::default()` as a name/value CSV,
//! the way `bitboost_gen_config_csv` lets a front-end discover every tunable
//! and its default without reading Rust source.

use std::path::PathBuf;

use clap::Parser;
use gbmcore::config::{BaseScore, BoostConfig, BoostType, FloatPrecision, NumericalBinType};

#[derive(Parser, Debug)]
#[clap(name = "gbm_gen_config_csv", about = "Emit the default configuration as CSV")]
struct Args {
    /// Write to this path instead of stdout.
    #[clap(long)]
    out: Option<PathBuf>,
}

fn boost_type_name(t: BoostType) -> &'static str {
    match t {
        BoostType::GBTree => "gbtree",
        BoostType::Dart => "dart",
        BoostType::Goss => "goss",
    }
}

fn numerical_bin_type_name(t: NumericalBinType) -> &'static str {
    match t {
        NumericalBinType::Width => "width",
        NumericalBinType::Depth => "depth",
    }
}

fn float_precision_name(t: FloatPrecision) -> &'static str {
    match t {
        FloatPrecision::Single => "single",
        FloatPrecision::Double => "double",
    }
}

fn base_score_value(b: BaseScore) -> String {
    match b {
        BaseScore::Auto => "auto".to_string(),
        BaseScore::Fixed(v) => v.to_string(),
    }
}

fn rows(config: &BoostConfig) -> Vec<(&'static str, String)> {
    vec![
        ("max_iter", config.max_iter.to_string()),
        ("max_depth", config.max_depth.to_string()),
        ("max_leaves", config.max_leaves.to_string()),
        ("max_bins", config.max_bins.to_string()),
        ("min_gain", config.min_gain.to_string()),
        ("min_node_hess", config.min_node_hess.to_string()),
        ("step_size", config.step_size.to_string()),
        ("reg_alpha", config.reg_alpha.to_string()),
        ("reg_lambda", config.reg_lambda.to_string()),
        ("base_score", base_score_value(config.base_score)),
        ("sub_sample", config.sub_sample.to_string()),
        ("col_sample_by_tree", config.col_sample_by_tree.to_string()),
        ("col_sample_by_level", config.col_sample_by_level.to_string()),
        ("boost_type", boost_type_name(config.boost_type).to_string()),
        ("drop_rate", config.drop_rate.to_string()),
        ("drop_skip", config.drop_skip.to_string()),
        ("min_drop", config.min_drop.to_string()),
        ("max_drop", config.max_drop.to_string()),
        ("max_brute_bins", config.max_brute_bins.to_string()),
        ("numerical_bin_type", numerical_bin_type_name(config.numerical_bin_type).to_string()),
        ("zero_as_missing", config.zero_as_missing.to_string()),
        ("checkpoint_interval", config.checkpoint_interval.to_string()),
        ("aggregation_depth", config.aggregation_depth.to_string()),
        ("seed", config.seed.to_string()),
        ("base_model_parallelism", config.base_model_parallelism.to_string()),
        ("block_size", config.block_size.to_string()),
        ("sample_blocks", config.sample_blocks.to_string()),
        ("float_precision", float_precision_name(config.float_precision).to_string()),
        ("csv_has_header", config.csv_has_header.to_string()),
        ("csv_delimiter", (config.csv_delimiter as char).to_string()),
    ]
}

fn main() {
    let args = Args::parse();
    let config = BoostConfig::new();

    let sink: Box<dyn std::io::Write> = match &args.out {
        Some(path) => Box::new(std::fs::File::create(path).expect("failed to open output path")),
        None => Box::new(std::io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);

    writer.write_record(&["name", "default"]).expect("failed to write header");
    for (name, value) in rows(&config) {
        writer.write_record(&[name, value.as_str()]).expect("failed to write row");
    }
    writer.flush().expect("failed to flush output");
}
