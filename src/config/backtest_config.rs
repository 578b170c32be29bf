use crate::data::Field;
use crate::error::{BacktestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

//reference strategies injected next to the user strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Benchmark {
    //equal weight across all assets
    Uniform,
    //tracks the index series, only for datasets that carry one
    Index,
}

impl Benchmark {
    pub fn name(&self) -> &'static str {
        match self {
            Benchmark::Uniform => "uniform",
            Benchmark::Index => "index",
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Benchmark {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "uniform" | "1/n" | "equal" => Ok(Benchmark::Uniform),
            "index" | "market" => Ok(Benchmark::Index),
            _ => Err(BacktestError::UnknownBenchmark(s.to_string())),
        }
    }
}

//proportional costs charged on the traded weight
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionCost {
    pub buy: f64,
    pub sell: f64,
}

impl TransactionCost {
    pub fn new(buy: f64, sell: f64) -> Self {
        TransactionCost { buy, sell }
    }

    pub fn is_zero(&self) -> bool {
        self.buy == 0.0 && self.sell == 0.0
    }

    //cost as a fraction of wealth for moving from `from` to `to`
    pub fn fraction(&self, from: &[f64], to: &[f64]) -> f64 {
        let (bought, sold) = from.iter().zip(to).fold((0.0, 0.0), |(b, s), (&old, &new)| {
            let delta = new - old;
            if delta > 0.0 {
                (b + delta, s)
            } else {
                (b, s - delta)
            }
        });
        self.buy * bought + self.sell * sold
    }
}

//optional checks on the weights a strategy returns
//these reject, they never rescale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConstraints {
    pub shortselling: bool,
    pub leverage: Option<f64>,
}

impl Default for WeightConstraints {
    fn default() -> Self {
        WeightConstraints {
            shortselling: true,
            leverage: None,
        }
    }
}

impl WeightConstraints {
    pub fn check(&self, weights: &[f64]) -> std::result::Result<(), String> {
        if !self.shortselling {
            if let Some((i, w)) = weights.iter().enumerate().find(|(_, w)| **w < 0.0) {
                return Err(format!(
                    "short position {} on asset {} while shortselling is disabled",
                    w, i
                ));
            }
        }
        if let Some(limit) = self.leverage {
            let gross: f64 = weights.iter().map(|w| w.abs()).sum();
            if gross > limit + 1e-9 {
                return Err(format!("gross exposure {:.6} exceeds leverage {}", gross, limit));
            }
        }
        Ok(())
    }
}

//complete backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfiguration {
    //bars handed to the strategy at each rebalance
    pub lookback_window: usize,
    //bars between rebalances
    pub rebalance_every: usize,
    //field used as the return basis
    pub price_field: Field,
    pub transaction_cost: TransactionCost,
    pub benchmarks: Vec<Benchmark>,
    pub parallel_strategies: usize,
    pub parallel_datasets: usize,
    pub show_progress: bool,
    pub constraints: WeightConstraints,
    //bounds script strategies, none means unbounded
    pub script_max_operations: Option<u64>,
}

impl Default for BacktestConfiguration {
    fn default() -> Self {
        BacktestConfiguration {
            lookback_window: 252,
            rebalance_every: 20,
            price_field: Field::Adjusted,
            transaction_cost: TransactionCost::default(),
            benchmarks: Vec::new(),
            parallel_strategies: 1,
            parallel_datasets: 1,
            show_progress: true,
            constraints: WeightConstraints::default(),
            script_max_operations: None,
        }
    }
}

impl BacktestConfiguration {
    //load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BacktestConfiguration = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    //save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookback_window == 0 {
            return Err(BacktestError::InvalidConfig(
                "lookback_window must be at least 1".to_string(),
            ));
        }
        if self.rebalance_every == 0 {
            return Err(BacktestError::InvalidConfig(
                "rebalance_every must be at least 1".to_string(),
            ));
        }
        let cost = self.transaction_cost;
        if !(cost.buy.is_finite() && cost.sell.is_finite()) || cost.buy < 0.0 || cost.sell < 0.0 {
            return Err(BacktestError::InvalidConfig(format!(
                "transaction costs must be finite and non-negative, got buy={} sell={}",
                cost.buy, cost.sell
            )));
        }
        if self.parallel_strategies == 0 || self.parallel_datasets == 0 {
            return Err(BacktestError::InvalidConfig(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if let Some(limit) = self.constraints.leverage {
            if !(limit > 0.0) {
                return Err(BacktestError::InvalidConfig(format!(
                    "leverage must be positive, got {}",
                    limit
                )));
            }
        }
        Ok(())
    }

    //bars a dataset needs before the first rebalance can complete
    pub fn min_bars(&self) -> usize {
        self.lookback_window + self.rebalance_every
    }
}
