use crate::error::Result;
use crate::metrics::Metric;
use crate::results::BacktestResultSet;
use indexmap::IndexMap;
use prettytable::{Cell, Row, Table};

//one metric pivoted into datasets (rows) by strategies (columns)
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTable {
    pub metric: Metric,
    pub strategies: Vec<String>,
    pub rows: IndexMap<String, Vec<Option<f64>>>,
}

impl MetricTable {
    pub fn get(&self, dataset: &str, strategy: &str) -> Option<f64> {
        let column = self.strategies.iter().position(|s| s == strategy)?;
        self.rows.get(dataset)?.get(column).copied().flatten()
    }

    //column of one strategy across datasets
    pub fn column(&self, strategy: &str) -> Option<Vec<Option<f64>>> {
        let column = self.strategies.iter().position(|s| s == strategy)?;
        Some(self.rows.values().map(|row| row[column]).collect())
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();

        let mut header = vec![Cell::new(self.metric.name())];
        header.extend(self.strategies.iter().map(|s| Cell::new(s)));
        table.add_row(Row::new(header));

        for (dataset, values) in &self.rows {
            let mut cells = vec![Cell::new(dataset)];
            cells.extend(values.iter().map(|v| Cell::new(&format_value(*v))));
            table.add_row(Row::new(cells));
        }
        table
    }
}

//fixed-width rendering of a possibly undefined value
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.abs() >= 1e4 => format!("{:.0}", v),
        Some(v) => format!("{:.4}", v),
        None => "-".to_string(),
    }
}

impl BacktestResultSet {
    //pivot of a single metric, looked up by name
    pub fn table(&self, metric: &str) -> Result<MetricTable> {
        let metric = self.resolve(metric)?;
        Ok(self.pivot(&metric))
    }

    //one pivot per reported metric
    pub fn tables(&self) -> IndexMap<Metric, MetricTable> {
        self.metrics()
            .iter()
            .map(|metric| (metric.clone(), self.pivot(metric)))
            .collect()
    }

    fn pivot(&self, metric: &Metric) -> MetricTable {
        let strategies: Vec<String> = self.strategies().map(str::to_string).collect();
        let rows = self
            .datasets()
            .into_iter()
            .map(|dataset| {
                let values = strategies
                    .iter()
                    .map(|strategy| self.get(strategy, dataset).and_then(|r| r.value(metric)))
                    .collect();
                (dataset.to_string(), values)
            })
            .collect();
        MetricTable {
            metric: metric.clone(),
            strategies,
            rows,
        }
    }
}
