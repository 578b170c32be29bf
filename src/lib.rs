//a rolling-window backtesting harness for portfolio selection strategies

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod portfolio;
pub mod results;
pub mod strategy;

pub use error::{BacktestError, Result};

//prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Benchmark, BacktestConfiguration, TransactionCost, WeightConstraints};
    pub use crate::data::{load_csv, load_dir, Dataset, Field, FieldMatrix, Window};
    pub use crate::engine::{
        Backtest, ExecutionScheduler, Fault, LogProgress, ProgressReporter, RunResult, RunState,
        Simulator,
    };
    pub use crate::error::BacktestError;
    pub use crate::metrics::{wealth_curve, Direction, Metric, MetricRegistry, WealthPoint};
    pub use crate::results::{BacktestResultSet, Leaderboard, Statistic, StrategyRef, Summary};
    pub use crate::strategy::{
        load_script_dir, load_scripts, NamedStrategy, ScriptNamespace, ScriptStrategy, Strategy,
        Uniform,
    };
}
