pub mod leaderboard;
pub mod result_set;
pub mod summary;
pub mod table;

pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use result_set::{BacktestResultSet, RunRecord, StrategyRef};
pub use summary::{Statistic, Summary, SummaryStats};
pub use table::{format_value, MetricTable};
