pub mod performance;
pub mod timeseries;

pub use performance::{
    Direction, Metric, MetricFn, MetricRegistry, PerformanceRecord, TRADING_PERIODS_PER_YEAR,
};
pub use timeseries::{drawdowns, max_drawdown, wealth_curve, WealthPoint};
