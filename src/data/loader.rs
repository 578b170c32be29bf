use crate::data::dataset::{Dataset, Field, FieldMatrix};
use crate::error::{BacktestError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use csv::ReaderBuilder;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::path::Path;

//one row of a long-format price file
#[derive(Debug, Deserialize)]
struct CsvRecord {
    timestamp: String,
    symbol: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    adjusted: Option<f64>,
    volume: f64,
    #[serde(default)]
    index: Option<f64>,
}

fn parse_timestamp(raw: &str, line: usize) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            BacktestError::InvalidConfig(format!("bad timestamp '{}' at line {}", raw, line))
        })
}

//loads a dataset from a long-format csv file
//columns: timestamp,symbol,open,high,low,close,adjusted,volume[,index]
//assets keep first-seen order, missing cells become NaN
pub fn load_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Dataset> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut timestamps = Vec::new();
    let mut assets = IndexSet::new();
    let mut records = Vec::new();

    for (index, result) in reader.deserialize().enumerate() {
        let record: CsvRecord = result?;
        let ts = parse_timestamp(&record.timestamp, index + 2)?;
        timestamps.push(ts);
        assets.insert(record.symbol.clone());
        records.push((ts, record));
    }

    //chronological order, one row per distinct timestamp
    timestamps.sort();
    timestamps.dedup();
    let rows: IndexMap<DateTime<Utc>, usize> =
        timestamps.iter().enumerate().map(|(i, t)| (*t, i)).collect();

    let n_rows = timestamps.len();
    let n_cols = assets.len();
    let mut open = FieldMatrix::filled(n_rows, n_cols, f64::NAN);
    let mut high = open.clone();
    let mut low = open.clone();
    let mut close = open.clone();
    let mut adjusted = open.clone();
    let mut volume = open.clone();
    let mut index_series = vec![f64::NAN; n_rows];
    let mut has_index = false;

    for (ts, record) in records {
        let row = rows[&ts];
        let col = assets.get_index_of(&record.symbol).unwrap_or_default();
        open.set(row, col, record.open);
        high.set(row, col, record.high);
        low.set(row, col, record.low);
        close.set(row, col, record.close);
        adjusted.set(row, col, record.adjusted.unwrap_or(record.close));
        volume.set(row, col, record.volume);
        if let Some(value) = record.index {
            index_series[row] = value;
            has_index = true;
        }
    }

    log::debug!(
        "loaded {:?}: {} bars x {} assets",
        path,
        n_rows,
        n_cols
    );

    let mut builder = Dataset::builder(name, timestamps, assets.into_iter().collect())
        .field(Field::Adjusted, adjusted)
        .field(Field::Open, open)
        .field(Field::High, high)
        .field(Field::Low, low)
        .field(Field::Close, close)
        .field(Field::Volume, volume);
    if has_index {
        builder = builder.index(index_series);
    }
    builder.build()
}

//loads every csv file of a folder, named after the file stem, in name order
pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<Dataset>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(BacktestError::MissingFolder(dir.to_path_buf()));
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| {
            let name = p
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            load_csv(p, &name)
        })
        .collect()
}
