use crate::engine::RunResult;
use crate::error::{BacktestError, Result};
use crate::metrics::timeseries::max_drawdown;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

//annualization constant for per-bar returns
pub const TRADING_PERIODS_PER_YEAR: f64 = 252.0;

//tail probability used by VaR and CVaR
const TAIL: f64 = 0.05;

//denominators at or below this are treated as zero
const EPSILON: f64 = 1e-12;

//which way a metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

//a named performance measure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Metric {
    SharpeRatio,
    MaxDrawdown,
    AnnualReturn,
    AnnualVolatility,
    SterlingRatio,
    OmegaRatio,
    Rot,
    ValueAtRisk,
    ConditionalValueAtRisk,
    CpuTime,
    //fraction of faulted runs, only meaningful across datasets
    FailureRate,
    Custom(String),
}

impl Metric {
    //per-run metrics in reporting order
    pub const BUILTIN: [Metric; 10] = [
        Metric::SharpeRatio,
        Metric::MaxDrawdown,
        Metric::AnnualReturn,
        Metric::AnnualVolatility,
        Metric::SterlingRatio,
        Metric::OmegaRatio,
        Metric::Rot,
        Metric::ValueAtRisk,
        Metric::ConditionalValueAtRisk,
        Metric::CpuTime,
    ];

    pub fn name(&self) -> &str {
        match self {
            Metric::SharpeRatio => "Sharpe ratio",
            Metric::MaxDrawdown => "max drawdown",
            Metric::AnnualReturn => "annual return",
            Metric::AnnualVolatility => "annual volatility",
            Metric::SterlingRatio => "Sterling ratio",
            Metric::OmegaRatio => "Omega ratio",
            Metric::Rot => "ROT (bps)",
            Metric::ValueAtRisk => "VaR (0.95)",
            Metric::ConditionalValueAtRisk => "CVaR (0.95)",
            Metric::CpuTime => "cpu time",
            Metric::FailureRate => "failure rate",
            Metric::Custom(name) => name,
        }
    }

    //direction of built-in metrics, custom ones are looked up in the registry
    pub fn builtin_direction(&self) -> Option<Direction> {
        match self {
            Metric::SharpeRatio
            | Metric::AnnualReturn
            | Metric::SterlingRatio
            | Metric::OmegaRatio
            | Metric::Rot => Some(Direction::HigherIsBetter),
            Metric::MaxDrawdown
            | Metric::AnnualVolatility
            | Metric::ValueAtRisk
            | Metric::ConditionalValueAtRisk
            | Metric::CpuTime
            | Metric::FailureRate => Some(Direction::LowerIsBetter),
            Metric::Custom(_) => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//parses built-in metric names and their snake_case aliases
impl FromStr for Metric {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        let metric = match key.as_str() {
            "sharpe ratio" | "sharpe" | "sharpe_ratio" => Metric::SharpeRatio,
            "max drawdown" | "max_drawdown" | "drawdown" => Metric::MaxDrawdown,
            "annual return" | "annual_return" => Metric::AnnualReturn,
            "annual volatility" | "annual_volatility" | "volatility" => Metric::AnnualVolatility,
            "sterling ratio" | "sterling" | "sterling_ratio" => Metric::SterlingRatio,
            "omega ratio" | "omega" | "omega_ratio" => Metric::OmegaRatio,
            "rot (bps)" | "rot" | "rot_bps" => Metric::Rot,
            "var (0.95)" | "var" => Metric::ValueAtRisk,
            "cvar (0.95)" | "cvar" => Metric::ConditionalValueAtRisk,
            "cpu time" | "cpu_time" => Metric::CpuTime,
            "failure rate" | "failure_rate" => Metric::FailureRate,
            _ => return Err(BacktestError::UnknownMetric(s.to_string())),
        };
        Ok(metric)
    }
}

impl From<String> for Metric {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(Metric::Custom(value))
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.name().to_string()
    }
}

//metric values of one run, none where the metric is undefined
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub values: IndexMap<Metric, Option<f64>>,
}

impl PerformanceRecord {
    pub fn get(&self, metric: &Metric) -> Option<f64> {
        self.values.get(metric).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Metric, Option<f64>)> {
        self.values.iter().map(|(m, v)| (m, *v))
    }
}

pub type MetricFn = Arc<dyn Fn(&RunResult) -> Option<f64> + Send + Sync>;

struct CustomMetric {
    name: String,
    direction: Direction,
    func: MetricFn,
}

//built-in measures plus user-registered ones
#[derive(Clone, Default)]
pub struct MetricRegistry {
    custom: Vec<Arc<CustomMetric>>,
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.custom.iter().map(|c| &c.name))
            .finish()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        MetricRegistry::default()
    }

    //adds a named metric to every later evaluation
    pub fn register<F>(&mut self, name: impl Into<String>, direction: Direction, func: F) -> Result<()>
    where
        F: Fn(&RunResult) -> Option<f64> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.parse::<Metric>().is_ok() || self.custom.iter().any(|c| c.name == name) {
            return Err(BacktestError::DuplicateMetric(name));
        }
        self.custom.push(Arc::new(CustomMetric {
            name,
            direction,
            func: Arc::new(func),
        }));
        Ok(())
    }

    //every per-run metric, built-ins first
    pub fn metrics(&self) -> Vec<Metric> {
        Metric::BUILTIN
            .iter()
            .cloned()
            .chain(self.custom.iter().map(|c| Metric::Custom(c.name.clone())))
            .collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Metric> {
        name.parse::<Metric>().or_else(|err| {
            self.custom
                .iter()
                .find(|c| c.name == name)
                .map(|c| Metric::Custom(c.name.clone()))
                .ok_or(err)
        })
    }

    pub fn direction(&self, metric: &Metric) -> Result<Direction> {
        if let Some(direction) = metric.builtin_direction() {
            return Ok(direction);
        }
        self.custom
            .iter()
            .find(|c| c.name == metric.name())
            .map(|c| c.direction)
            .ok_or_else(|| BacktestError::UnknownMetric(metric.name().to_string()))
    }

    //computes the full metric set of a run
    pub fn evaluate(&self, run: &RunResult) -> PerformanceRecord {
        let mut values = IndexMap::new();
        if run.steps() == 0 || run.returns.is_empty() {
            for metric in self.metrics() {
                values.insert(metric, None);
            }
            return PerformanceRecord { values };
        }

        let returns = run.returns.as_slice();
        let annual = annual_return(returns);
        let volatility = annual_volatility(returns);
        let drawdown = max_drawdown(&run.wealth);

        values.insert(Metric::SharpeRatio, ratio(annual, volatility));
        values.insert(Metric::MaxDrawdown, Some(drawdown));
        values.insert(Metric::AnnualReturn, annual);
        values.insert(Metric::AnnualVolatility, volatility);
        values.insert(Metric::SterlingRatio, ratio(annual, Some(drawdown)));
        values.insert(Metric::OmegaRatio, omega_ratio(returns));
        values.insert(Metric::Rot, return_over_turnover(run));
        values.insert(Metric::ValueAtRisk, value_at_risk(returns));
        values.insert(Metric::ConditionalValueAtRisk, conditional_value_at_risk(returns));
        values.insert(Metric::CpuTime, Some(run.elapsed.as_secs_f64()));

        for custom in &self.custom {
            let value = (custom.func)(run).filter(|v| v.is_finite());
            values.insert(Metric::Custom(custom.name.clone()), value);
        }
        PerformanceRecord { values }
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > EPSILON => Some(n / d),
        _ => None,
    }
}

//geometric compounding annualized to TRADING_PERIODS_PER_YEAR
pub fn annual_return(returns: &[f64]) -> Option<f64> {
    if returns.is_empty() {
        return None;
    }
    let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
    if growth <= 0.0 {
        return Some(-1.0);
    }
    Some(growth.powf(TRADING_PERIODS_PER_YEAR / returns.len() as f64) - 1.0)
}

//sample standard deviation scaled by sqrt(TRADING_PERIODS_PER_YEAR)
pub fn annual_volatility(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let sd = returns.std_dev();
    sd.is_finite().then(|| sd * TRADING_PERIODS_PER_YEAR.sqrt())
}

//gain-loss ratio at threshold zero
pub fn omega_ratio(returns: &[f64]) -> Option<f64> {
    let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| -r).sum();
    (losses > 0.0).then(|| gains / losses)
}

//cumulative return per unit of turnover, in basis points
pub fn return_over_turnover(run: &RunResult) -> Option<f64> {
    let final_wealth = run.final_wealth()?;
    (run.turnover > 0.0).then(|| (final_wealth - 1.0) / run.turnover * 1e4)
}

fn tail_quantile(returns: &[f64]) -> Option<f64> {
    if returns.is_empty() {
        return None;
    }
    let mut data = Data::new(returns.to_vec());
    Some(data.quantile(TAIL))
}

//historical 95% value-at-risk as a positive loss
pub fn value_at_risk(returns: &[f64]) -> Option<f64> {
    tail_quantile(returns).map(|q| -q)
}

//mean loss beyond the 95% value-at-risk
pub fn conditional_value_at_risk(returns: &[f64]) -> Option<f64> {
    let q = tail_quantile(returns)?;
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= q).collect();
    if tail.is_empty() {
        return Some(-q);
    }
    Some(-tail.mean())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fault::Fault;
    use crate::engine::{RunState, WeightRecord};
    use approx::assert_relative_eq;
    use chrono::Utc;
    use std::time::Duration;

    fn run(returns: Vec<f64>, turnover: f64) -> RunResult {
        let mut wealth = Vec::with_capacity(returns.len());
        let mut w = 1.0;
        for r in &returns {
            w *= 1.0 + r;
            wealth.push(w);
        }
        let mut result = RunResult::faulted("s", "d", Fault::new("placeholder"));
        result.state = RunState::Completed;
        result.fault = None;
        result.timestamps = vec![Utc::now(); returns.len()];
        result.wealth = wealth;
        result.returns = returns;
        result.turnover = turnover;
        result.elapsed = Duration::from_millis(250);
        result.weights.push(WeightRecord {
            bar: 0,
            timestamp: Utc::now(),
            weights: vec![1.0],
            turnover,
            cost: 0.0,
        });
        result
    }

    #[test]
    fn test_constant_returns_have_no_sharpe() {
        let record = MetricRegistry::new().evaluate(&run(vec![0.001; 50], 1.0));
        assert_relative_eq!(record.get(&Metric::AnnualVolatility).unwrap(), 0.0, epsilon = 1e-12);
        assert_eq!(record.get(&Metric::SharpeRatio), None);
        assert_eq!(record.get(&Metric::SterlingRatio), None);
        assert_eq!(record.get(&Metric::OmegaRatio), None);
        let expected = 1.001_f64.powf(252.0) - 1.0;
        assert_relative_eq!(record.get(&Metric::AnnualReturn).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_metric_values() {
        let returns = vec![0.02, -0.01, 0.03, -0.02, 0.01];
        let record = MetricRegistry::new().evaluate(&run(returns.clone(), 2.0));

        let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
        let annual = growth.powf(252.0 / 5.0) - 1.0;
        let vol = returns.as_slice().std_dev() * 252f64.sqrt();
        assert_relative_eq!(record.get(&Metric::AnnualReturn).unwrap(), annual, epsilon = 1e-9);
        assert_relative_eq!(record.get(&Metric::SharpeRatio).unwrap(), annual / vol, epsilon = 1e-9);
        assert_relative_eq!(record.get(&Metric::OmegaRatio).unwrap(), 0.06 / 0.03, epsilon = 1e-12);
        assert_relative_eq!(
            record.get(&Metric::Rot).unwrap(),
            (growth - 1.0) / 2.0 * 1e4,
            epsilon = 1e-9
        );
        assert_relative_eq!(record.get(&Metric::CpuTime).unwrap(), 0.25);
        //the 1.02 * 0.99 peak-to-trough after the third bar
        let mdd = record.get(&Metric::MaxDrawdown).unwrap();
        assert_relative_eq!(mdd, 0.02, epsilon = 1e-12);
        assert_relative_eq!(record.get(&Metric::SterlingRatio).unwrap(), annual / mdd, epsilon = 1e-9);
        assert!(record.get(&Metric::ValueAtRisk).unwrap() > 0.0);
        assert!(
            record.get(&Metric::ConditionalValueAtRisk).unwrap()
                >= record.get(&Metric::ValueAtRisk).unwrap() - 1e-12
        );
    }

    #[test]
    fn test_zero_steps_all_missing() {
        let registry = MetricRegistry::new();
        let record = registry.evaluate(&RunResult::faulted("s", "d", Fault::new("boom")));
        assert_eq!(record.values.len(), Metric::BUILTIN.len());
        assert!(record.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_no_turnover_no_rot() {
        let record = MetricRegistry::new().evaluate(&run(vec![0.01, -0.01], 0.0));
        assert_eq!(record.get(&Metric::Rot), None);
    }

    #[test]
    fn test_custom_metric() {
        let mut registry = MetricRegistry::new();
        registry
            .register("final wealth", Direction::HigherIsBetter, |r| r.final_wealth())
            .unwrap();
        assert!(matches!(
            registry.register("Sharpe ratio", Direction::HigherIsBetter, |_| None),
            Err(BacktestError::DuplicateMetric(_))
        ));

        let custom = registry.resolve("final wealth").unwrap();
        assert_eq!(custom, Metric::Custom("final wealth".into()));
        assert_eq!(registry.direction(&custom).unwrap(), Direction::HigherIsBetter);

        let record = registry.evaluate(&run(vec![0.1, 0.1], 1.0));
        assert_relative_eq!(record.get(&custom).unwrap(), 1.21, epsilon = 1e-12);
        assert!(registry.resolve("alpha").is_err());
    }

    #[test]
    fn test_metric_names_round_trip() {
        for metric in Metric::BUILTIN.iter() {
            assert_eq!(&metric.name().parse::<Metric>().unwrap(), metric);
        }
        assert_eq!("max_drawdown".parse::<Metric>().unwrap(), Metric::MaxDrawdown);
    }
}
