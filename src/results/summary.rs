use crate::metrics::{Direction, Metric};
use crate::results::table::format_value;
use crate::results::BacktestResultSet;
use indexmap::IndexMap;
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

//how a metric is aggregated across datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    Median,
    Worst,
}

//one metric of one strategy across its datasets, undefined runs skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub worst: Option<f64>,
    //datasets the metric was defined on
    pub count: usize,
}

impl SummaryStats {
    fn from_values(values: Vec<f64>, direction: Direction) -> Self {
        if values.is_empty() {
            return SummaryStats::default();
        }
        let count = values.len();
        let worst = match direction {
            Direction::HigherIsBetter => values.iter().copied().fold(f64::INFINITY, f64::min),
            Direction::LowerIsBetter => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        let mean = values.iter().mean();
        let median = Data::new(values).median();
        SummaryStats {
            mean: Some(mean),
            median: Some(median),
            worst: Some(worst),
            count,
        }
    }

    pub fn get(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Mean => self.mean,
            Statistic::Median => self.median,
            Statistic::Worst => self.worst,
        }
    }
}

//per strategy, per metric aggregate across datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub metrics: Vec<Metric>,
    pub rows: IndexMap<String, IndexMap<Metric, SummaryStats>>,
}

impl Summary {
    pub fn get(&self, strategy: &str, metric: &Metric) -> Option<&SummaryStats> {
        self.rows.get(strategy)?.get(metric)
    }

    //fraction of faulted runs of a strategy
    pub fn failure_rate(&self, strategy: &str) -> Option<f64> {
        self.get(strategy, &Metric::FailureRate)?.mean
    }

    //strategies by metrics for one statistic
    pub fn to_table(&self, statistic: Statistic) -> Table {
        let mut table = Table::new();

        let mut header = vec![Cell::new(&format!("{:?}", statistic).to_lowercase())];
        header.extend(self.metrics.iter().map(|m| Cell::new(m.name())));
        table.add_row(Row::new(header));

        for (strategy, stats) in &self.rows {
            let mut cells = vec![Cell::new(strategy)];
            cells.extend(self.metrics.iter().map(|m| {
                let value = stats.get(m).and_then(|s| s.get(statistic));
                Cell::new(&format_value(value))
            }));
            table.add_row(Row::new(cells));
        }
        table
    }
}

impl BacktestResultSet {
    //mean, median and worst of every reported metric for each strategy
    pub fn summary(&self) -> Summary {
        let metrics = self.metrics().to_vec();
        let mut rows = IndexMap::new();
        for (strategy, runs) in self.iter() {
            let mut stats = IndexMap::new();
            for metric in &metrics {
                let direction = self
                    .direction(metric)
                    .unwrap_or(Direction::HigherIsBetter);
                let values: Vec<f64> = runs.values().filter_map(|r| r.value(metric)).collect();
                stats.insert(metric.clone(), SummaryStats::from_values(values, direction));
            }
            rows.insert(strategy.to_string(), stats);
        }
        Summary { metrics, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use crate::results::result_set::tests::{failed, run, sample};
    use approx::assert_relative_eq;

    #[test]
    fn test_stats() {
        let stats = SummaryStats::from_values(vec![1.0, 4.0, 2.0, 3.0], Direction::HigherIsBetter);
        assert_relative_eq!(stats.mean.unwrap(), 2.5);
        assert_relative_eq!(stats.median.unwrap(), 2.5);
        assert_relative_eq!(stats.worst.unwrap(), 1.0);
        assert_eq!(stats.count, 4);

        let stats = SummaryStats::from_values(vec![0.1, 0.3, 0.2], Direction::LowerIsBetter);
        assert_relative_eq!(stats.worst.unwrap(), 0.3);
        assert_relative_eq!(stats.median.unwrap(), 0.2);

        assert_eq!(SummaryStats::from_values(Vec::new(), Direction::LowerIsBetter).mean, None);
    }

    #[test]
    fn test_summary_skips_undefined_runs() {
        let summary = sample().summary();
        let wild = summary.get("wild", &Metric::AnnualReturn).unwrap();
        assert_eq!(wild.count, 1);
        assert_relative_eq!(summary.failure_rate("wild").unwrap(), 0.5);
        assert_relative_eq!(summary.failure_rate("steady").unwrap(), 0.0);
    }

    #[test]
    fn test_all_failed_strategy() {
        let set = BacktestResultSet::from_runs(
            vec![failed("broken", "d1"), failed("broken", "d2"), run("ok", "d1", &[0.01, 0.02])],
            MetricRegistry::new(),
        );
        let summary = set.summary();
        assert_eq!(summary.get("broken", &Metric::SharpeRatio).unwrap().median, None);
        assert_relative_eq!(summary.failure_rate("broken").unwrap(), 1.0);
        let text = summary.to_table(Statistic::Median).to_string();
        assert!(text.contains("broken"));
        assert!(text.contains("failure rate"));
    }
}
