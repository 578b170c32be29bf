use crate::config::BacktestConfiguration;
use crate::data::Dataset;
use crate::engine::fault::guard;
use crate::engine::simulator::{RunResult, Simulator};
use crate::error::{BacktestError, Result};
use crate::metrics::MetricRegistry;
use crate::results::BacktestResultSet;
use crate::strategy::{NamedStrategy, Strategy};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

//receives (pairs completed, total) as runs finish, from any worker thread
pub trait ProgressReporter: Send + Sync {
    fn start(&self, _total: usize) {}

    fn advance(&self, done: usize, total: usize, run: &RunResult);

    fn finish(&self, _total: usize) {}
}

//default reporter, writes progress to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn start(&self, total: usize) {
        log::info!("running {} strategy/dataset pairs", total);
    }

    fn advance(&self, done: usize, total: usize, run: &RunResult) {
        log::info!(
            "[{}/{}] {} on {}: {:?} after {} steps",
            done,
            total,
            run.strategy,
            run.dataset,
            run.state,
            run.steps()
        );
    }

    fn finish(&self, total: usize) {
        log::info!("finished {} pairs", total);
    }
}

//one strategy with the datasets it runs on
struct Group {
    strategy: usize,
    datasets: Vec<Arc<Dataset>>,
}

fn build_pool(threads: usize, axis: &'static str) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("backtest-{}-{}", axis, i))
        .build()
        .map_err(|e| BacktestError::InvalidConfig(format!("{} thread pool: {}", axis, e)))
}

//runs every strategy over every dataset and collects the results
pub struct ExecutionScheduler {
    config: BacktestConfiguration,
    registry: MetricRegistry,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl ExecutionScheduler {
    pub fn new(config: BacktestConfiguration) -> Self {
        let progress: Option<Arc<dyn ProgressReporter>> = if config.show_progress {
            Some(Arc::new(LogProgress))
        } else {
            None
        };
        ExecutionScheduler {
            config,
            registry: MetricRegistry::new(),
            progress,
        }
    }

    pub fn with_registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    //replaces the reporter, ignored when progress is switched off
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        if self.config.show_progress {
            self.progress = Some(reporter);
        }
        self
    }

    pub fn config(&self) -> &BacktestConfiguration {
        &self.config
    }

    //validates the inputs, then runs every pair plus the requested benchmarks
    pub fn run(
        &self,
        strategies: Vec<NamedStrategy>,
        datasets: Vec<Arc<Dataset>>,
    ) -> Result<BacktestResultSet> {
        self.config.validate()?;
        if datasets.is_empty() {
            return Err(BacktestError::InvalidConfig("no datasets given".to_string()));
        }
        if strategies.is_empty() && self.config.benchmarks.is_empty() {
            return Err(BacktestError::InvalidConfig(
                "no strategies or benchmarks given".to_string(),
            ));
        }
        check_unique("dataset", datasets.iter().map(|d| d.name()))?;
        for dataset in &datasets {
            if !dataset.has_field(&self.config.price_field) {
                return Err(BacktestError::MissingField {
                    dataset: dataset.name().to_string(),
                    field: self.config.price_field.to_string(),
                });
            }
        }

        let mut strategies = strategies;
        let mut groups: Vec<Group> = (0..strategies.len())
            .map(|strategy| Group {
                strategy,
                datasets: datasets.clone(),
            })
            .collect();
        for benchmark in &self.config.benchmarks {
            groups.push(Group {
                strategy: strategies.len(),
                datasets: datasets
                    .iter()
                    .filter_map(|d| benchmark.dataset_for(d, &self.config.price_field))
                    .collect(),
            });
            strategies.push(NamedStrategy::from_arc(benchmark.name(), benchmark.strategy()));
        }
        check_unique("strategy", strategies.iter().map(|s| s.name.as_str()))?;

        let total: usize = groups.iter().map(|g| g.datasets.len()).sum();
        let outer = self.config.parallel_strategies.max(1);
        let inner = self.config.parallel_datasets.max(1);
        log::info!(
            "backtest: {} strategies x {} datasets, {} runs on {} x {} worker(s)",
            strategies.len(),
            datasets.len(),
            total,
            outer,
            inner
        );
        if let Some(progress) = &self.progress {
            progress.start(total);
        }

        let started = Instant::now();
        let done = AtomicUsize::new(0);
        let run_pair = |strategy: &NamedStrategy, dataset: &Arc<Dataset>| {
            let result = self.run_pair(strategy, dataset);
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(progress) = &self.progress {
                progress.advance(finished, total, &result);
            }
            result
        };
        //one strategy over its datasets, in parallel on the given pool if any
        let run_group = |group: &Group, pool: Option<&rayon::ThreadPool>| -> Vec<RunResult> {
            let strategy = &strategies[group.strategy];
            match pool {
                Some(pool) => pool.install(|| {
                    group
                        .datasets
                        .par_iter()
                        .map(|d| run_pair(strategy, d))
                        .collect()
                }),
                None => group.datasets.iter().map(|d| run_pair(strategy, d)).collect(),
            }
        };
        let inner_pool = || -> Result<Option<rayon::ThreadPool>> {
            if inner == 1 {
                Ok(None)
            } else {
                build_pool(inner, "dataset").map(Some)
            }
        };

        let runs: Vec<RunResult> = if outer == 1 {
            let pool = inner_pool()?;
            groups
                .iter()
                .flat_map(|g| run_group(g, pool.as_ref()))
                .collect()
        } else {
            //one worker loop per outer thread, each pulling the next strategy
            let next = AtomicUsize::new(0);
            let worker = |_: rayon::BroadcastContext<'_>| -> Result<Vec<(usize, Vec<RunResult>)>> {
                let pool = inner_pool()?;
                let mut mine = Vec::new();
                loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(group) = groups.get(i) else { break };
                    mine.push((i, run_group(group, pool.as_ref())));
                }
                Ok(mine)
            };
            let per_worker = build_pool(outer, "strategy")?.broadcast(worker);
            let mut finished = Vec::with_capacity(groups.len());
            for worker in per_worker {
                finished.extend(worker?);
            }
            finished.sort_by_key(|(i, _)| *i);
            finished.into_iter().flat_map(|(_, runs)| runs).collect()
        };

        if let Some(progress) = &self.progress {
            progress.finish(total);
        }
        let faulted = runs.iter().filter(|r| r.is_faulted()).count();
        log::info!(
            "backtest finished in {:?}: {} runs, {} faulted",
            started.elapsed(),
            runs.len(),
            faulted
        );

        Ok(BacktestResultSet::from_runs(runs, self.registry.clone()))
    }

    //a failure escaping the simulator still only ends this pair
    fn run_pair(&self, strategy: &NamedStrategy, dataset: &Dataset) -> RunResult {
        let simulator = Simulator::new(&self.config);
        let name = strategy.name.as_str();
        match guard(|| Ok(simulator.run(name, strategy.strategy.as_ref(), dataset))) {
            Ok(result) => result,
            Err(fault) => {
                log::error!("{} on {} aborted: {}", name, dataset.name(), fault);
                RunResult::faulted(name, dataset.name(), fault)
            }
        }
    }
}

fn check_unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(BacktestError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

//builder-style entry point
//
//  let results = Backtest::new(config)
//      .strategy(my_strategy)
//      .named_strategy("momentum", momentum)
//      .dataset(prices)
//      .run()?;
//
//unnamed strategies become fun1, fun2, ... and datasets with an empty name
//become "dataset 1", "dataset 2", ..., numbered by position
pub struct Backtest {
    config: BacktestConfiguration,
    strategies: Vec<(Option<String>, Arc<dyn Strategy>)>,
    datasets: Vec<Arc<Dataset>>,
    registry: MetricRegistry,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl Backtest {
    pub fn new(config: BacktestConfiguration) -> Self {
        Backtest {
            config,
            strategies: Vec::new(),
            datasets: Vec::new(),
            registry: MetricRegistry::new(),
            progress: None,
        }
    }

    pub fn strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push((None, Arc::new(strategy)));
        self
    }

    pub fn named_strategy(mut self, name: impl Into<String>, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push((Some(name.into()), Arc::new(strategy)));
        self
    }

    //already-named strategies, e.g. loaded scripts
    pub fn strategies(mut self, strategies: impl IntoIterator<Item = NamedStrategy>) -> Self {
        self.strategies
            .extend(strategies.into_iter().map(|s| (Some(s.name), s.strategy)));
        self
    }

    pub fn dataset(mut self, dataset: impl Into<Arc<Dataset>>) -> Self {
        self.datasets.push(dataset.into());
        self
    }

    pub fn datasets<D: Into<Arc<Dataset>>>(mut self, datasets: impl IntoIterator<Item = D>) -> Self {
        self.datasets.extend(datasets.into_iter().map(Into::into));
        self
    }

    pub fn metrics(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn progress(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.progress = Some(Arc::new(reporter));
        self
    }

    pub fn run(self) -> Result<BacktestResultSet> {
        let strategies = self
            .strategies
            .into_iter()
            .enumerate()
            .map(|(i, (name, strategy))| {
                let name = name.unwrap_or_else(|| format!("fun{}", i + 1));
                NamedStrategy::from_arc(name, strategy)
            })
            .collect();
        let datasets = self
            .datasets
            .into_iter()
            .enumerate()
            .map(|(i, dataset)| {
                if dataset.name().is_empty() {
                    let mut named = Arc::unwrap_or_clone(dataset);
                    named.rename(format!("dataset {}", i + 1));
                    Arc::new(named)
                } else {
                    dataset
                }
            })
            .collect();

        let mut scheduler = ExecutionScheduler::new(self.config).with_registry(self.registry);
        if let Some(progress) = self.progress {
            scheduler = scheduler.with_progress(progress);
        }
        scheduler.run(strategies, datasets)
    }
}
