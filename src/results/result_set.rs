use crate::engine::RunResult;
use crate::error::{BacktestError, Result};
use crate::metrics::{Direction, Metric, MetricRegistry, PerformanceRecord};
use indexmap::IndexMap;

//a run together with its metrics
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run: RunResult,
    pub performance: PerformanceRecord,
}

impl RunRecord {
    //value of a metric for this run, failure rate is 0 or 1 per run
    pub fn value(&self, metric: &Metric) -> Option<f64> {
        match metric {
            Metric::FailureRate => Some(if self.run.is_faulted() { 1.0 } else { 0.0 }),
            _ => self.performance.get(metric),
        }
    }
}

//addresses a strategy by name or by submission position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyRef {
    Name(String),
    Position(usize),
}

impl From<&str> for StrategyRef {
    fn from(name: &str) -> Self {
        StrategyRef::Name(name.to_string())
    }
}

impl From<String> for StrategyRef {
    fn from(name: String) -> Self {
        StrategyRef::Name(name)
    }
}

impl From<usize> for StrategyRef {
    fn from(position: usize) -> Self {
        StrategyRef::Position(position)
    }
}

//strategy -> dataset -> run, keys in submission order
#[derive(Debug, Clone)]
pub struct BacktestResultSet {
    runs: IndexMap<String, IndexMap<String, RunRecord>>,
    registry: MetricRegistry,
    metrics: Vec<Metric>,
}

impl BacktestResultSet {
    //evaluates every run and files it under its strategy and dataset
    pub fn from_runs(runs: Vec<RunResult>, registry: MetricRegistry) -> Self {
        let mut grouped: IndexMap<String, IndexMap<String, RunRecord>> = IndexMap::new();
        for run in runs {
            let performance = registry.evaluate(&run);
            grouped
                .entry(run.strategy.clone())
                .or_default()
                .insert(run.dataset.clone(), RunRecord { run, performance });
        }

        let mut metrics = registry.metrics();
        metrics.push(Metric::FailureRate);
        BacktestResultSet {
            runs: grouped,
            registry,
            metrics,
        }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    //metrics the views report, in order
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn strategies(&self) -> impl Iterator<Item = &str> {
        self.runs.keys().map(String::as_str)
    }

    //every dataset name, in order of first appearance
    pub fn datasets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for runs in self.runs.values() {
            for name in runs.keys() {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.runs.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, strategy: &str, dataset: &str) -> Option<&RunRecord> {
        self.runs.get(strategy)?.get(dataset)
    }

    pub fn runs_of(&self, strategy: &str) -> Option<&IndexMap<String, RunRecord>> {
        self.runs.get(strategy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexMap<String, RunRecord>)> {
        self.runs.iter().map(|(name, runs)| (name.as_str(), runs))
    }

    //keeps only the given strategies, in the order asked for
    pub fn select<I, S>(&self, strategies: I) -> Result<BacktestResultSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<StrategyRef>,
    {
        let mut runs = IndexMap::new();
        for key in strategies {
            let (name, records) = match key.into() {
                StrategyRef::Name(name) => self
                    .runs
                    .get_key_value(&name)
                    .ok_or(BacktestError::UnknownStrategy(name))?,
                StrategyRef::Position(i) => self
                    .runs
                    .get_index(i)
                    .ok_or_else(|| BacktestError::UnknownStrategy(format!("#{}", i)))?,
            };
            runs.insert(name.clone(), records.clone());
        }
        Ok(BacktestResultSet {
            runs,
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        })
    }

    //restricts the reported metrics to the named ones
    pub fn with_metrics<S: AsRef<str>>(&self, names: &[S]) -> Result<BacktestResultSet> {
        let metrics = names
            .iter()
            .map(|name| self.resolve(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_metrics_unchecked(metrics))
    }

    pub(crate) fn with_metrics_unchecked(&self, metrics: Vec<Metric>) -> BacktestResultSet {
        BacktestResultSet {
            runs: self.runs.clone(),
            registry: self.registry.clone(),
            metrics,
        }
    }

    //built-in, registered, or failure rate
    pub fn resolve(&self, name: &str) -> Result<Metric> {
        self.registry.resolve(name)
    }

    pub(crate) fn direction(&self, metric: &Metric) -> Result<Direction> {
        self.registry.direction(metric)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::{Fault, RunState, WeightRecord};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    //a completed run with the given per-bar returns and one rebalance
    pub(crate) fn run(strategy: &str, dataset: &str, returns: &[f64]) -> RunResult {
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        let mut result = RunResult::faulted(strategy, dataset, Fault::new("unused"));
        result.state = RunState::Completed;
        result.fault = None;
        let mut wealth = 1.0;
        for (i, r) in returns.iter().enumerate() {
            wealth *= 1.0 + r;
            result.timestamps.push(start + ChronoDuration::days(i as i64));
            result.returns.push(*r);
            result.wealth.push(wealth);
        }
        result.weights.push(WeightRecord {
            bar: 0,
            timestamp: start,
            weights: vec![1.0],
            turnover: 1.0,
            cost: 0.0,
        });
        result.turnover = 1.0;
        result.elapsed = Duration::from_millis(10);
        result
    }

    pub(crate) fn failed(strategy: &str, dataset: &str) -> RunResult {
        RunResult::faulted(strategy, dataset, Fault::new("boom"))
    }

    pub(crate) fn sample() -> BacktestResultSet {
        BacktestResultSet::from_runs(
            vec![
                run("steady", "d1", &[0.01, 0.0, 0.01, 0.005]),
                run("steady", "d2", &[0.002, 0.001, 0.003, 0.0]),
                run("wild", "d1", &[0.05, -0.04, 0.06, -0.05]),
                failed("wild", "d2"),
            ],
            MetricRegistry::new(),
        )
    }

    #[test]
    fn test_grouping_keeps_order() {
        let set = sample();
        assert_eq!(set.strategies().collect::<Vec<_>>(), vec!["steady", "wild"]);
        assert_eq!(set.datasets(), vec!["d1", "d2"]);
        assert_eq!(set.len(), 4);
        assert!(set.get("wild", "d2").unwrap().run.is_faulted());
        assert_eq!(set.get("wild", "d2").unwrap().value(&Metric::SharpeRatio), None);
        assert_eq!(set.get("wild", "d2").unwrap().value(&Metric::FailureRate), Some(1.0));
    }

    #[test]
    fn test_select_by_name_and_position() {
        let set = sample();
        let picked = set.select([StrategyRef::from(1), StrategyRef::from("steady")]).unwrap();
        assert_eq!(picked.strategies().collect::<Vec<_>>(), vec!["wild", "steady"]);
        assert!(matches!(
            set.select(["nope"]),
            Err(BacktestError::UnknownStrategy(_))
        ));
        assert!(set.select([7usize]).is_err());
    }

    #[test]
    fn test_metric_subset() {
        let set = sample();
        let narrowed = set.with_metrics(&["sharpe", "max drawdown"]).unwrap();
        assert_eq!(
            narrowed.metrics(),
            &[Metric::SharpeRatio, Metric::MaxDrawdown]
        );
        assert!(matches!(
            set.with_metrics(&["alpha"]),
            Err(BacktestError::UnknownMetric(_))
        ));
    }
}
