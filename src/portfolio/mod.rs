pub mod holdings;

pub use holdings::{HoldingState, Rebalance};
