use std::path::PathBuf;
use thiserror::Error;

//configuration and aggregation errors reported straight to the caller
//strategy faults never surface here, they live in each run result
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("dataset '{dataset}': {reason}")]
    MalformedDataset { dataset: String, reason: String },

    #[error("dataset '{dataset}' has no field '{field}'")]
    MissingField { dataset: String, field: String },

    #[error("unknown benchmark '{0}' (expected one of: uniform, index)")]
    UnknownBenchmark(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("metric '{0}' is already registered")]
    DuplicateMetric(String),

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no such folder: {0:?}")]
    MissingFolder(PathBuf),

    #[error("script {path:?}: {reason}")]
    Script { path: PathBuf, reason: String },

    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("leaderboard weights: {0}")]
    InvalidWeights(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
