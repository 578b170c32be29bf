pub mod adapter;
pub mod benchmark;
pub mod script;

use crate::data::Window;
use std::fmt;
use std::sync::Arc;

pub use adapter::StrategyAdapter;
pub use benchmark::{IndexTracking, Uniform};
pub use script::{load_script_dir, load_scripts, ScriptNamespace, ScriptStrategy, ENTRY_POINT};

//strategy interface that all portfolio strategies must implement
//
//`current` is always supplied: the drifted weights held going into the
//rebalance, all zeros on the first call. Strategies that do not care about
//their holdings simply ignore it. The returned vector must have one finite
//entry per asset of the window, in the window's asset order.
pub trait Strategy: Send + Sync {
    fn weights(&self, window: &Window<'_>, current: &[f64]) -> anyhow::Result<Vec<f64>>;
}

//plain functions and closures are strategies
impl<F> Strategy for F
where
    F: Fn(&Window<'_>, &[f64]) -> anyhow::Result<Vec<f64>> + Send + Sync,
{
    fn weights(&self, window: &Window<'_>, current: &[f64]) -> anyhow::Result<Vec<f64>> {
        self(window, current)
    }
}

//a strategy with its display name, unique within a run
#[derive(Clone)]
pub struct NamedStrategy {
    pub name: String,
    pub strategy: Arc<dyn Strategy>,
}

impl NamedStrategy {
    pub fn new(name: impl Into<String>, strategy: impl Strategy + 'static) -> Self {
        NamedStrategy {
            name: name.into(),
            strategy: Arc::new(strategy),
        }
    }

    pub fn from_arc(name: impl Into<String>, strategy: Arc<dyn Strategy>) -> Self {
        NamedStrategy {
            name: name.into(),
            strategy,
        }
    }
}

impl fmt::Debug for NamedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedStrategy").field("name", &self.name).finish()
    }
}
