use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portfolio_bench::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "portfolio-bench")]
#[command(about = "Rolling-window backtests of portfolio selection strategies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    //run every strategy script against every dataset
    Run {
        //folder of long-format csv files, one dataset per file
        #[arg(long)]
        data: PathBuf,

        //folder of .rhai strategy scripts defining portfolio_fun
        #[arg(long)]
        strategies: PathBuf,

        //json configuration, flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        //bars handed to each strategy call
        #[arg(long)]
        lookback: Option<usize>,

        //bars between rebalances
        #[arg(long)]
        rebalance_every: Option<usize>,

        //price field returns are computed from (adjusted, close, ...)
        #[arg(long)]
        price_field: Option<Field>,

        //proportional cost on purchases
        #[arg(long)]
        buy_cost: Option<f64>,

        //proportional cost on sales
        #[arg(long)]
        sell_cost: Option<f64>,

        //benchmarks to add (uniform, index), repeatable
        #[arg(long = "benchmark")]
        benchmarks: Vec<Benchmark>,

        //workers along the strategy axis
        #[arg(long)]
        parallel_strategies: Option<usize>,

        //workers along the dataset axis
        #[arg(long)]
        parallel_datasets: Option<usize>,

        //reject negative weights
        #[arg(long)]
        long_only: bool,

        //maximum gross exposure
        #[arg(long)]
        leverage: Option<f64>,

        //operation budget per script call
        #[arg(long)]
        max_operations: Option<u64>,

        //merge helper functions of all scripts into one namespace
        #[arg(long)]
        shared_namespace: bool,

        //silence per-run progress
        #[arg(long)]
        no_progress: bool,

        //leaderboard weight as metric=weight, repeatable
        #[arg(long = "weight", value_parser = parse_weight)]
        weights: Vec<(String, f64)>,

        //output path for wealth curves csv
        #[arg(long)]
        output_wealth_csv: Option<PathBuf>,
    },

    //write the default configuration as json
    InitConfig {
        //destination file
        #[arg(long, default_value = "backtest.json")]
        output: PathBuf,
    },
}

fn parse_weight(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, weight) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected metric=weight, got '{}'", s))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|e| format!("bad weight '{}': {}", weight, e))?;
    Ok((name.trim().to_string(), weight))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            data,
            strategies,
            config,
            lookback,
            rebalance_every,
            price_field,
            buy_cost,
            sell_cost,
            benchmarks,
            parallel_strategies,
            parallel_datasets,
            long_only,
            leverage,
            max_operations,
            shared_namespace,
            no_progress,
            weights,
            output_wealth_csv,
        } => {
            let mut cfg = match config {
                Some(path) => BacktestConfiguration::from_json_file(&path)
                    .with_context(|| format!("Failed to load configuration from {:?}", path))?,
                None => BacktestConfiguration::default(),
            };
            if let Some(v) = lookback {
                cfg.lookback_window = v;
            }
            if let Some(v) = rebalance_every {
                cfg.rebalance_every = v;
            }
            if let Some(v) = price_field {
                cfg.price_field = v;
            }
            if let Some(v) = buy_cost {
                cfg.transaction_cost.buy = v;
            }
            if let Some(v) = sell_cost {
                cfg.transaction_cost.sell = v;
            }
            if !benchmarks.is_empty() {
                cfg.benchmarks = benchmarks;
            }
            if let Some(v) = parallel_strategies {
                cfg.parallel_strategies = v;
            }
            if let Some(v) = parallel_datasets {
                cfg.parallel_datasets = v;
            }
            if long_only {
                cfg.constraints.shortselling = false;
            }
            if leverage.is_some() {
                cfg.constraints.leverage = leverage;
            }
            if max_operations.is_some() {
                cfg.script_max_operations = max_operations;
            }
            if no_progress {
                cfg.show_progress = false;
            }
            cfg.validate().context("Invalid configuration")?;

            let namespace = if shared_namespace {
                ScriptNamespace::Shared
            } else {
                ScriptNamespace::Isolated
            };
            run_backtest(cfg, &data, &strategies, namespace, weights, output_wealth_csv)?;
        }
        Commands::InitConfig { output } => {
            BacktestConfiguration::default()
                .to_json_file(&output)
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!("Default configuration written to {:?}", output);
        }
    }

    Ok(())
}

fn run_backtest(
    cfg: BacktestConfiguration,
    data_dir: &Path,
    strategy_dir: &Path,
    namespace: ScriptNamespace,
    weights: Vec<(String, f64)>,
    output_wealth_csv: Option<PathBuf>,
) -> Result<()> {
    println!("Portfolio Backtest");
    println!("==================\n");

    let datasets =
        load_dir(data_dir).with_context(|| format!("Failed to load datasets from {:?}", data_dir))?;
    for dataset in &datasets {
        println!(
            "Dataset {}: {} bars x {} assets",
            dataset.name(),
            dataset.len(),
            dataset.n_assets()
        );
    }

    let strategies = load_script_dir(strategy_dir, namespace, cfg.script_max_operations)
        .with_context(|| format!("Failed to load strategies from {:?}", strategy_dir))?;
    let names: Vec<&str> = strategies.iter().map(|s| s.name.as_str()).collect();
    println!("Strategies: {}\n", names.join(", "));

    println!(
        "Lookback {} bars, rebalancing every {} bars on '{}'",
        cfg.lookback_window, cfg.rebalance_every, cfg.price_field
    );
    println!(
        "Costs: buy {:.4}, sell {:.4}\n",
        cfg.transaction_cost.buy, cfg.transaction_cost.sell
    );

    let results = Backtest::new(cfg)
        .strategies(strategies)
        .datasets(datasets)
        .run()
        .context("Backtest failed")?;

    for (strategy, runs) in results.iter() {
        for (dataset, record) in runs {
            if let Some(fault) = &record.run.fault {
                println!("{} on {} faulted:\n{}\n", strategy, dataset, fault.render());
            }
        }
    }

    println!("Median performance");
    println!("==================\n");
    let summary = results.summary();
    summary.to_table(Statistic::Median).printstd();

    let weights = if weights.is_empty() {
        vec![
            ("Sharpe ratio".to_string(), 1.0),
            ("max drawdown".to_string(), 1.0),
            ("failure rate".to_string(), 1.0),
        ]
    } else {
        weights
    };
    let leaderboard = results
        .leaderboard(weights)
        .context("Failed to build leaderboard")?;
    println!("\nLeaderboard");
    println!("===========\n");
    leaderboard.to_table().printstd();

    if let Some(path) = output_wealth_csv {
        save_wealth_csv(&results, &path)?;
        println!("\nWealth curves saved to {:?}", path);
    }

    Ok(())
}

#[derive(Serialize)]
struct WealthRow<'a> {
    strategy: &'a str,
    dataset: &'a str,
    timestamp: String,
    wealth: f64,
    drawdown: f64,
    returns: f64,
}

fn save_wealth_csv(results: &BacktestResultSet, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    for (strategy, runs) in results.iter() {
        for (dataset, record) in runs {
            for point in wealth_curve(&record.run) {
                writer.serialize(WealthRow {
                    strategy,
                    dataset,
                    timestamp: point.timestamp.to_rfc3339(),
                    wealth: point.wealth,
                    drawdown: point.drawdown,
                    returns: point.returns,
                })?;
            }
        }
    }
    writer.flush()?;

    Ok(())
}
