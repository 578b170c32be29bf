use crate::error::{BacktestError, Result};
use crate::metrics::{Direction, Metric};
use crate::results::summary::Statistic;
use crate::results::BacktestResultSet;
use indexmap::IndexMap;
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub strategy: String,
    //weighted score, 0 to 100
    pub score: f64,
    //percentile score per weighted metric
    pub scores: IndexMap<Metric, f64>,
}

//strategies ordered by weighted percentile score, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub weights: IndexMap<Metric, f64>,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn rank_of(&self, strategy: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.strategy == strategy)
            .map(|e| e.rank)
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();

        let mut header = vec![Cell::new("rank"), Cell::new("strategy"), Cell::new("score")];
        header.extend(self.weights.keys().map(|m| Cell::new(m.name())));
        table.add_row(Row::new(header));

        for entry in &self.entries {
            let mut cells = vec![
                Cell::new(&entry.rank.to_string()),
                Cell::new(&entry.strategy),
                Cell::new(&format!("{:.1}", entry.score)),
            ];
            cells.extend(
                self.weights
                    .keys()
                    .map(|m| Cell::new(&format!("{:.1}", entry.scores.get(m).copied().unwrap_or(0.0)))),
            );
            table.add_row(Row::new(cells));
        }
        table
    }
}

//share of strategies at or below each value, 0 to 100, missing values score 0
fn percentile_scores(values: &[Option<f64>], direction: Direction) -> Vec<f64> {
    let n = values.len() as f64;
    let better_or_equal = |a: f64, b: f64| match direction {
        Direction::HigherIsBetter => a >= b,
        Direction::LowerIsBetter => a <= b,
    };
    values
        .iter()
        .map(|value| match value {
            Some(v) => {
                let beaten = values
                    .iter()
                    .filter(|other| match other {
                        Some(o) => better_or_equal(*v, *o),
                        None => true,
                    })
                    .count();
                100.0 * beaten as f64 / n
            }
            None => 0.0,
        })
        .collect()
}

impl BacktestResultSet {
    //ranks strategies by the weighted percentile scores of their median metrics,
    //failure rate is scored on its mean
    pub fn leaderboard<I, S>(&self, weights: I) -> Result<Leaderboard>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut resolved: IndexMap<Metric, f64> = IndexMap::new();
        for (name, weight) in weights {
            let metric = self.resolve(name.as_ref())?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(BacktestError::InvalidWeights(format!(
                    "weight of '{}' must be finite and non-negative, got {}",
                    metric, weight
                )));
            }
            *resolved.entry(metric).or_insert(0.0) += weight;
        }
        let total: f64 = resolved.values().sum();
        if total <= 0.0 {
            return Err(BacktestError::InvalidWeights(
                "weights must not sum to zero".to_string(),
            ));
        }

        let strategies: Vec<String> = self.strategies().map(str::to_string).collect();
        let mut scores: Vec<IndexMap<Metric, f64>> = vec![IndexMap::new(); strategies.len()];
        let summary = self.with_metrics_unchecked(resolved.keys().cloned().collect()).summary();

        for metric in resolved.keys() {
            let statistic = match metric {
                Metric::FailureRate => Statistic::Mean,
                _ => Statistic::Median,
            };
            let values: Vec<Option<f64>> = strategies
                .iter()
                .map(|s| summary.get(s, metric).and_then(|stats| stats.get(statistic)))
                .collect();
            let direction = self.direction(metric)?;
            for (row, score) in scores.iter_mut().zip(percentile_scores(&values, direction)) {
                row.insert(metric.clone(), score);
            }
        }

        let mut entries: Vec<LeaderboardEntry> = strategies
            .into_iter()
            .zip(scores)
            .map(|(strategy, scores)| {
                let score = resolved
                    .iter()
                    .map(|(metric, weight)| weight * scores.get(metric).copied().unwrap_or(0.0))
                    .sum::<f64>()
                    / total;
                LeaderboardEntry {
                    rank: 0,
                    strategy,
                    score,
                    scores,
                }
            })
            .collect();

        //stable, ties keep submission order
        entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }

        Ok(Leaderboard {
            weights: resolved,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use crate::results::result_set::tests::{failed, run, sample};
    use approx::assert_relative_eq;

    #[test]
    fn test_percentile_scores() {
        let scores = percentile_scores(&[Some(1.0), Some(3.0), Some(2.0), None], Direction::HigherIsBetter);
        assert_eq!(scores, vec![50.0, 100.0, 75.0, 0.0]);
        let scores = percentile_scores(&[Some(1.0), Some(3.0)], Direction::LowerIsBetter);
        assert_eq!(scores, vec![100.0, 50.0]);
        let ties = percentile_scores(&[Some(1.0), Some(1.0)], Direction::HigherIsBetter);
        assert_eq!(ties, vec![100.0, 100.0]);
    }

    #[test]
    fn test_single_metric_ranking() {
        let set = BacktestResultSet::from_runs(
            vec![
                run("low", "d1", &[0.001, 0.002]),
                run("high", "d1", &[0.01, 0.02]),
                run("mid", "d1", &[0.005, 0.006]),
            ],
            MetricRegistry::new(),
        );
        let board = set.leaderboard([("annual return", 1.0)]).unwrap();
        let order: Vec<&str> = board.entries.iter().map(|e| e.strategy.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
        assert_relative_eq!(board.entries[0].score, 100.0);
        assert_eq!(board.rank_of("low"), Some(3));
    }

    #[test]
    fn test_failures_drag_score() {
        let set = BacktestResultSet::from_runs(
            vec![
                run("a", "d1", &[0.01, 0.01]),
                run("a", "d2", &[0.01, 0.01]),
                run("b", "d1", &[0.01, 0.01]),
                failed("b", "d2"),
            ],
            MetricRegistry::new(),
        );
        let board = set.leaderboard([("failure rate", 1.0)]).unwrap();
        assert_eq!(board.entries[0].strategy, "a");
        assert_relative_eq!(board.entries[1].score, 50.0);
    }

    #[test]
    fn test_weight_errors() {
        let set = sample();
        assert!(matches!(
            set.leaderboard([("alpha", 1.0)]),
            Err(BacktestError::UnknownMetric(_))
        ));
        assert!(matches!(
            set.leaderboard([("sharpe", -1.0)]),
            Err(BacktestError::InvalidWeights(_))
        ));
        assert!(matches!(
            set.leaderboard([("sharpe", 0.0), ("omega", 0.0)]),
            Err(BacktestError::InvalidWeights(_))
        ));
        assert!(matches!(
            set.leaderboard(Vec::<(&str, f64)>::new()),
            Err(BacktestError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_weighted_mix() {
        let set = sample();
        let board = set
            .leaderboard([("sharpe", 2.0), ("max drawdown", 1.0), ("failure rate", 1.0)])
            .unwrap();
        assert_eq!(board.entries.len(), 2);
        assert_eq!(board.entries[0].strategy, "steady");
        assert!(board.entries.iter().all(|e| (0.0..=100.0).contains(&e.score)));
        assert!(board.to_table().to_string().contains("Sharpe ratio"));
    }
}
