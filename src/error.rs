use thiserror::Error;

/// Error taxonomy for the boosting core (spec §7).
///
/// `NumericDegenerate` and `EmptyIteration` are constructed internally and
/// are policy, not surprises: a degenerate split/leaf is demoted to "no
/// split" and logged, never propagated to a caller as a hard error; an empty
/// iteration ends the boosting loop gracefully. Both variants exist so
/// internal call sites can express *why* they bailed without resorting to
/// `log::warn!` string matching.
#[derive(Error, Debug)]
pub enum GbmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("numeric degenerate: {0}")]
    NumericDegenerate(String),

    #[error("empty iteration: no tree was produced")]
    EmptyIteration,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GbmResult<T> = Result<T, GbmError>;

impl GbmError {
    pub fn config<S: Into<String>>(msg: S) -> GbmError {
        GbmError::Configuration(msg.into())
    }

    pub fn shape<A: std::fmt::Debug, B: std::fmt::Debug>(expected: A, actual: B) -> GbmError {
        GbmError::ShapeMismatch {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}
