pub mod fault;
pub mod scheduler;
pub mod simulator;

pub use fault::{guard, Fault};
pub use scheduler::{Backtest, ExecutionScheduler, LogProgress, ProgressReporter};
pub use simulator::{RunResult, RunState, Simulator, WeightRecord};
