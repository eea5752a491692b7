//! `run_gbm`: load a CSV dataset, train a boosting model, report the
//! evaluation history -- the CLI front-end role `run_bitboost` plays for the
//! donor crate.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;

use gbmcore::boost::BoostingDriver;
use gbmcore::callback::EarlyStopping;
use gbmcore::config::{BaseScore, BoostConfig, BoostType, NumericalBinType};
use gbmcore::data::{Dataset, RawTable};
use gbmcore::objective::{LogLoss, Objective, SquaredError};

#[derive(Parser, Debug)]
#[clap(name = "run_gbm", about = "Train a histogram-based gradient boosting model")]
struct Args {
    /// Path to the training CSV. The last column (or last `raw_size`
    /// columns) is treated as the label.
    #[clap(long)]
    train: PathBuf,

    /// Optional held-out CSV evaluated after every round.
    #[clap(long)]
    test: Option<PathBuf>,

    /// `squared_error` or `logloss`.
    #[clap(long, default_value = "squared_error")]
    objective: String,

    #[clap(long, default_value_t = 20)]
    max_iter: usize,

    #[clap(long, default_value_t = 5)]
    max_depth: usize,

    #[clap(long, default_value_t = 64)]
    max_bins: usize,

    #[clap(long, default_value_t = 0.1)]
    step_size: f32,

    #[clap(long, default_value_t = 1.0)]
    reg_lambda: f32,

    #[clap(long)]
    dart: bool,

    #[clap(long, default_value_t = 0.0)]
    drop_rate: f32,

    #[clap(long)]
    categorical_features: Vec<usize>,

    #[clap(long)]
    rank_features: Vec<usize>,

    #[clap(long, default_value_t = 0)]
    early_stopping_patience: usize,

    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// Write the trained model's logical persistence tables (spec §6) as
    /// JSON to this path after training.
    #[clap(long)]
    model_out: Option<PathBuf>,
}

fn build_objective(name: &str) -> Box<dyn Objective> {
    match name {
        "logloss" => Box::new(LogLoss),
        _ => Box::new(SquaredError),
    }
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let mut config = BoostConfig::new();
    config.max_iter = args.max_iter;
    config.max_depth = args.max_depth;
    config.max_bins = args.max_bins;
    config.step_size = args.step_size;
    config.reg_lambda = args.reg_lambda;
    config.seed = args.seed;
    config.categorical_features = args.categorical_features.clone();
    config.rank_features = args.rank_features.clone();
    config.base_score = BaseScore::Auto;
    config.numerical_bin_type = NumericalBinType::Depth;
    if args.dart {
        config.boost_type = BoostType::Dart;
        config.drop_rate = args.drop_rate;
    }

    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {}", e);
        std::process::exit(1);
    }

    let objective = build_objective(&args.objective);

    let train_raw = match RawTable::from_csv_path(&config, &args.train) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to read {}: {}", args.train.display(), e);
            std::process::exit(1);
        }
    };
    let raw_size = objective.raw_size();
    let train_ds = match Dataset::from_raw(&config, &train_raw, raw_size) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to build training dataset: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "loaded {} rows, {} features",
        train_ds.nrows(),
        train_ds.nfeatures()
    );

    let mut driver = match BoostingDriver::new(config.clone(), &train_ds, objective.as_ref()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to initialize boosting driver: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(test_path) = &args.test {
        let test_raw = match RawTable::from_csv_path(&config, test_path) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("failed to read {}: {}", test_path.display(), e);
                std::process::exit(1);
            }
        };
        if let Err(e) = driver.set_test_set(&test_raw) {
            eprintln!("failed to register test set: {}", e);
            std::process::exit(1);
        }
    }

    let mut callbacks: Vec<Box<dyn gbmcore::callback::Callback>> = Vec::new();
    if args.early_stopping_patience > 0 {
        callbacks.push(Box::new(EarlyStopping::new("rmse", args.early_stopping_patience, true)));
    }

    let start = Instant::now();
    if let Err(e) = driver.train(&mut callbacks) {
        eprintln!("training failed: {}", e);
        std::process::exit(1);
    }
    info!("training finished in {:?}", start.elapsed());

    for (name, history) in driver.train_history() {
        let last = history.last().copied().unwrap_or(0.0);
        println!("train {}: {:.6} (final of {} rounds)", name, last, history.len());
    }
    for (name, history) in driver.test_history() {
        let last = history.last().copied().unwrap_or(0.0);
        println!("test {}: {:.6} (final of {} rounds)", name, last, history.len());
    }

    if let Some(model_out) = &args.model_out {
        let json = match driver.model().to_json() {
            Ok(j) => j,
            Err(e) => {
                eprintln!("failed to serialize model: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = std::fs::write(model_out, json) {
            eprintln!("failed to write {}: {}", model_out.display(), e);
            std::process::exit(1);
        }
        info!("wrote model to {}", model_out.display());
    }
}
