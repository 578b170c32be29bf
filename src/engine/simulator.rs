use crate::config::BacktestConfiguration;
use crate::data::{simple_return, Dataset, FieldMatrix};
use crate::engine::fault::Fault;
use crate::portfolio::HoldingState;
use crate::strategy::{Strategy, StrategyAdapter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

//terminal state of one (strategy, dataset) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Completed,
    Faulted,
}

//weights decided at one rebalance step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    //index of the first bar held with these weights
    pub bar: usize,
    pub timestamp: DateTime<Utc>,
    pub weights: Vec<f64>,
    pub turnover: f64,
    //fraction of wealth paid to get there
    pub cost: f64,
}

//everything one run produced, including a partial prefix when it faulted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub strategy: String,
    pub dataset: String,
    pub state: RunState,
    //one entry per realized bar
    pub timestamps: Vec<DateTime<Utc>>,
    pub returns: Vec<f64>,
    pub wealth: Vec<f64>,
    //one entry per completed rebalance step
    pub weights: Vec<WeightRecord>,
    pub turnover: f64,
    pub elapsed: Duration,
    pub fault: Option<Fault>,
}

impl RunResult {
    fn start(strategy: &str, dataset: &str) -> Self {
        RunResult {
            strategy: strategy.to_string(),
            dataset: dataset.to_string(),
            state: RunState::Completed,
            timestamps: Vec::new(),
            returns: Vec::new(),
            wealth: Vec::new(),
            weights: Vec::new(),
            turnover: 0.0,
            elapsed: Duration::ZERO,
            fault: None,
        }
    }

    //a run that failed before or during its first step
    pub fn faulted(strategy: &str, dataset: &str, fault: Fault) -> Self {
        let mut result = RunResult::start(strategy, dataset);
        result.state = RunState::Faulted;
        result.fault = Some(fault);
        result
    }

    pub fn steps(&self) -> usize {
        self.weights.len()
    }

    pub fn is_faulted(&self) -> bool {
        self.state == RunState::Faulted
    }

    pub fn final_wealth(&self) -> Option<f64> {
        self.wealth.last().copied()
    }

    //same realized path, ignoring timing
    pub fn same_path(&self, other: &RunResult) -> bool {
        self.state == other.state
            && self.timestamps == other.timestamps
            && self.returns == other.returns
            && self.wealth == other.wealth
            && self.weights == other.weights
            && self.turnover == other.turnover
            && self.fault.as_ref().map(|f| &f.message) == other.fault.as_ref().map(|f| &f.message)
    }
}

//walk-forward simulation of one strategy over one dataset
pub struct Simulator<'a> {
    config: &'a BacktestConfiguration,
}

impl<'a> Simulator<'a> {
    pub fn new(config: &'a BacktestConfiguration) -> Self {
        Simulator { config }
    }

    //runs the strategy over the dataset, never panics or errors out
    pub fn run(&self, name: &str, strategy: &dyn Strategy, dataset: &Dataset) -> RunResult {
        let started = Instant::now();
        let mut result = RunResult::start(name, dataset.name());

        let prices = match self.check(dataset) {
            Ok(prices) => prices,
            Err(fault) => {
                log::warn!("{} on {}: {}", name, dataset.name(), fault);
                result.state = RunState::Faulted;
                result.fault = Some(fault);
                result.elapsed = started.elapsed();
                return result;
            }
        };

        let adapter = StrategyAdapter::new(name, strategy, self.config.constraints);
        let lookback = self.config.lookback_window;
        let every = self.config.rebalance_every;
        let bars = dataset.len();
        let timestamps = dataset.timestamps();

        let mut holdings = HoldingState::new(dataset.n_assets());
        let mut asset_returns = vec![0.0; dataset.n_assets()];
        let mut last_wealth = holdings.wealth();
        let mut t = lookback;

        while t < bars {
            let window = dataset.window(t - lookback..t);
            let target = match adapter.invoke(&window, holdings.weights()) {
                Ok(weights) => weights,
                Err(fault) => {
                    log::warn!(
                        "{} on {} faulted at bar {} after {} steps: {}",
                        name,
                        dataset.name(),
                        t,
                        result.steps(),
                        fault
                    );
                    result.state = RunState::Faulted;
                    result.fault = Some(fault);
                    break;
                }
            };

            let step = holdings.rebalance(target, &self.config.transaction_cost);
            result.turnover += step.turnover;
            result.weights.push(WeightRecord {
                bar: t,
                timestamp: timestamps[t],
                weights: holdings.weights().to_vec(),
                turnover: step.turnover,
                cost: step.cost,
            });

            //hold through [t, t + every), the rebalance cost lands in the first bar
            for bar in t..(t + every).min(bars) {
                let prev = prices.row(bar - 1);
                let next = prices.row(bar);
                for (r, (p0, p1)) in asset_returns.iter_mut().zip(prev.iter().zip(next)) {
                    *r = simple_return(*p0, *p1);
                }
                holdings.advance(&asset_returns);

                let wealth = holdings.wealth();
                let period_return = if last_wealth > 0.0 {
                    wealth / last_wealth - 1.0
                } else {
                    0.0
                };
                result.timestamps.push(timestamps[bar]);
                result.returns.push(period_return);
                result.wealth.push(wealth);
                last_wealth = wealth;
            }

            log::debug!(
                "{} on {}: rebalanced at bar {}, turnover {:.4}, wealth {:.6}",
                name,
                dataset.name(),
                t,
                step.turnover,
                last_wealth
            );
            t += every;
        }

        result.elapsed = started.elapsed();
        log::debug!(
            "{} on {} finished {:?} with {} steps in {:?}",
            name,
            dataset.name(),
            result.state,
            result.steps(),
            result.elapsed
        );
        result
    }

    //init checks, hands back the price matrix returns are computed from
    fn check<'d>(&self, dataset: &'d Dataset) -> Result<&'d FieldMatrix, Fault> {
        let prices = dataset.field(&self.config.price_field).ok_or_else(|| {
            Fault::new(format!("dataset has no '{}' field", self.config.price_field))
                .with_location(format!("dataset '{}'", dataset.name()))
        })?;
        if let Err(err) = self.config.validate() {
            return Err(Fault::new(err.to_string()));
        }
        if dataset.len() < self.config.min_bars() {
            return Err(Fault::new(format!(
                "dataset has {} bars, needs at least {} (lookback {} + rebalance {})",
                dataset.len(),
                self.config.min_bars(),
                self.config.lookback_window,
                self.config.rebalance_every
            ))
            .with_location(format!("dataset '{}'", dataset.name())));
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionCost;
    use crate::data::{Field, Window};
    use crate::strategy::Uniform;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    //two assets, the first doubles over the sample, the second is flat
    fn dataset(bars: usize) -> Dataset {
        let ts = (0..bars)
            .map(|i| Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64))
            .collect();
        let rows = (0..bars)
            .map(|i| vec![100.0 * (1.0 + i as f64 / bars as f64), 50.0])
            .collect();
        Dataset::builder("trend", ts, vec!["UP".into(), "FLAT".into()])
            .field(Field::Adjusted, FieldMatrix::from_rows(rows).unwrap())
            .build()
            .unwrap()
    }

    fn config(lookback: usize, every: usize) -> BacktestConfiguration {
        BacktestConfiguration {
            lookback_window: lookback,
            rebalance_every: every,
            ..BacktestConfiguration::default()
        }
    }

    fn all_in_first(w: &Window<'_>, _: &[f64]) -> anyhow::Result<Vec<f64>> {
        let mut weights = vec![0.0; w.n_assets()];
        weights[0] = 1.0;
        Ok(weights)
    }

    fn hold(_: &Window<'_>, current: &[f64]) -> anyhow::Result<Vec<f64>> {
        Ok(current.to_vec())
    }

    fn fail_late(w: &Window<'_>, _: &[f64]) -> anyhow::Result<Vec<f64>> {
        if w.bars().end >= 30 {
            anyhow::bail!("ran out of ideas");
        }
        Ok(vec![0.5, 0.5])
    }

    #[test]
    fn test_step_schedule() {
        let cfg = config(10, 5);
        let result = Simulator::new(&cfg).run("uniform", &Uniform, &dataset(32));
        assert_eq!(result.state, RunState::Completed);
        let bars: Vec<usize> = result.weights.iter().map(|w| w.bar).collect();
        assert_eq!(bars, vec![10, 15, 20, 25, 30]);
        //last period is truncated at the end of the data
        assert_eq!(result.returns.len(), 22);
        assert_eq!(result.timestamps.len(), result.wealth.len());
    }

    #[test]
    fn test_wealth_follows_price() {
        let cfg = config(5, 5);
        let ds = dataset(20);
        let result = Simulator::new(&cfg).run("all_in", &all_in_first, &ds);
        let prices = ds.field(&Field::Adjusted).unwrap();
        let expected = prices.get(19, 0) / prices.get(4, 0);
        assert_relative_eq!(result.final_wealth().unwrap(), expected, epsilon = 1e-12);
        //only the first rebalance trades
        assert_relative_eq!(result.turnover, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cost_is_charged_once() {
        let mut cfg = config(5, 5);
        cfg.transaction_cost = TransactionCost::new(0.01, 0.01);
        let ds = dataset(20);
        let free = Simulator::new(&config(5, 5)).run("all_in", &all_in_first, &ds);
        let paid = Simulator::new(&cfg).run("all_in", &all_in_first, &ds);
        assert_relative_eq!(
            paid.final_wealth().unwrap(),
            free.final_wealth().unwrap() * 0.99,
            epsilon = 1e-12
        );
        assert_relative_eq!(paid.returns[0], (1.0 + free.returns[0]) * 0.99 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hold_current_never_trades() {
        let mut cfg = config(5, 3);
        cfg.transaction_cost = TransactionCost::new(0.002, 0.002);
        let result = Simulator::new(&cfg).run("hold", &hold, &dataset(20));
        assert_eq!(result.turnover, 0.0);
        assert!(result.wealth.iter().all(|w| *w == 1.0));
    }

    #[test]
    fn test_fault_keeps_prefix() {
        let cfg = config(10, 5);
        let result = Simulator::new(&cfg).run("fail_late", &fail_late, &dataset(40));
        assert_eq!(result.state, RunState::Faulted);
        assert_eq!(result.steps(), 4);
        assert_eq!(result.returns.len(), 20);
        let fault = result.fault.unwrap();
        assert_eq!(fault.message, "ran out of ideas");
        assert!(fault.location.unwrap().contains("at bar 30"));
    }

    #[test]
    fn test_short_dataset_faults_in_init() {
        let cfg = config(10, 5);
        let result = Simulator::new(&cfg).run("uniform", &Uniform, &dataset(14));
        assert!(result.is_faulted());
        assert_eq!(result.steps(), 0);
        assert!(result.fault.unwrap().message.contains("needs at least 15"));
    }

    #[test]
    fn test_missing_price_field_faults() {
        let mut cfg = config(5, 5);
        cfg.price_field = Field::Close;
        let result = Simulator::new(&cfg).run("uniform", &Uniform, &dataset(20));
        assert!(result.is_faulted());
        assert!(result.fault.unwrap().message.contains("'close'"));
    }

    #[test]
    fn test_repeatable() {
        let cfg = config(7, 4);
        let ds = dataset(50);
        let a = Simulator::new(&cfg).run("uniform", &Uniform, &ds);
        let b = Simulator::new(&cfg).run("uniform", &Uniform, &ds);
        assert!(a.same_path(&b));
    }
}
