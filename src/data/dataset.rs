use crate::error::{BacktestError, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

//a named field of a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Field {
    #[default]
    Adjusted,
    Open,
    High,
    Low,
    Close,
    Volume,
    //user-added indicator
    Indicator(String),
}

impl Field {
    pub fn as_str(&self) -> &str {
        match self {
            Field::Adjusted => "adjusted",
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
            Field::Indicator(name) => name,
        }
    }

    //parses only the standard fields, indicator names are free-form
    pub fn parse_standard(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "adjusted" | "adj" | "adjusted_close" => Some(Field::Adjusted),
            "open" => Some(Field::Open),
            "high" => Some(Field::High),
            "low" => Some(Field::Low),
            "close" => Some(Field::Close),
            "volume" => Some(Field::Volume),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "index" || trimmed == "assets" || trimmed == "timestamps" {
            return Err(BacktestError::UnknownField(s.to_string()));
        }
        Ok(Field::parse_standard(trimmed).unwrap_or_else(|| Field::Indicator(trimmed.to_string())))
    }
}

impl TryFrom<String> for Field {
    type Error = BacktestError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.as_str().to_string()
    }
}

//row-major matrix, rows are bars and columns are assets
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl FieldMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows * cols != data.len() {
            return Err(BacktestError::InvalidConfig(format!(
                "matrix of {}x{} cannot hold {} values",
                rows,
                cols,
                data.len()
            )));
        }
        Ok(FieldMatrix { rows, cols, data })
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
            return Err(BacktestError::InvalidConfig(format!(
                "row {} has {} values, expected {}",
                bad,
                rows[bad].len(),
                cols
            )));
        }
        let n = rows.len();
        FieldMatrix::new(n, cols, rows.into_iter().flatten().collect())
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        FieldMatrix {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn view(&self, rows: Range<usize>) -> MatrixView<'_> {
        MatrixView {
            data: &self.data[rows.start * self.cols..rows.end * self.cols],
            cols: self.cols,
        }
    }
}

//borrowed contiguous block of rows
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    data: &'a [f64],
    cols: usize,
}

impl<'a> MatrixView<'a> {
    pub fn rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.data.len() / self.cols
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &'a [f64] {
        let data = self.data;
        &data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &'a [f64]> + 'a {
        let data = self.data;
        data.chunks(self.cols.max(1))
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        self.iter_rows().map(|r| r[col]).collect()
    }

    pub fn last_row(&self) -> Option<&'a [f64]> {
        match self.rows() {
            0 => None,
            n => Some(self.row(n - 1)),
        }
    }
}

//a named bundle of aligned matrices sharing one time axis and one asset axis
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    timestamps: Vec<DateTime<Utc>>,
    assets: Vec<String>,
    fields: IndexMap<Field, FieldMatrix>,
    index: Option<Vec<f64>>,
}

impl Dataset {
    pub fn builder(
        name: impl Into<String>,
        timestamps: Vec<DateTime<Utc>>,
        assets: Vec<String>,
    ) -> DatasetBuilder {
        DatasetBuilder {
            name: name.into(),
            timestamps,
            assets,
            fields: IndexMap::new(),
            index: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn field(&self, field: &Field) -> Option<&FieldMatrix> {
        self.fields.get(field)
    }

    pub fn has_field(&self, field: &Field) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&Field, &FieldMatrix)> {
        self.fields.iter()
    }

    pub fn index(&self) -> Option<&[f64]> {
        self.index.as_deref()
    }

    //adds a user indicator aligned with the existing axes
    pub fn with_indicator(mut self, name: impl Into<String>, matrix: FieldMatrix) -> Result<Self> {
        let field: Field = name.into().parse()?;
        if self.fields.contains_key(&field) {
            return Err(BacktestError::MalformedDataset {
                dataset: self.name.clone(),
                reason: format!("field '{}' already exists", field),
            });
        }
        check_shape(&self.name, &field, &matrix, self.len(), self.n_assets())?;
        self.fields.insert(field, matrix);
        Ok(self)
    }

    //slices bars [start, end) of every field
    pub fn window(&self, bars: Range<usize>) -> Window<'_> {
        let end = bars.end.min(self.len());
        let start = bars.start.min(end);
        Window {
            dataset: self,
            bars: start..end,
        }
    }

    //single-asset view of the index series, used by the index benchmark;
    //the series is exposed as adjusted, close and the requested price field
    pub fn index_dataset(&self, price_field: &Field) -> Option<Dataset> {
        let index = self.index.as_ref()?;
        let matrix = FieldMatrix {
            rows: index.len(),
            cols: 1,
            data: index.clone(),
        };
        let mut fields = IndexMap::new();
        for field in [Field::Adjusted, Field::Close, price_field.clone()] {
            fields.insert(field, matrix.clone());
        }
        Some(Dataset {
            name: self.name.clone(),
            timestamps: self.timestamps.clone(),
            assets: vec!["index".to_string()],
            fields,
            index: Some(index.clone()),
        })
    }
}

pub struct DatasetBuilder {
    name: String,
    timestamps: Vec<DateTime<Utc>>,
    assets: Vec<String>,
    fields: IndexMap<Field, FieldMatrix>,
    index: Option<Vec<f64>>,
}

impl DatasetBuilder {
    pub fn field(mut self, field: Field, matrix: FieldMatrix) -> Self {
        self.fields.insert(field, matrix);
        self
    }

    pub fn index(mut self, series: Vec<f64>) -> Self {
        self.index = Some(series);
        self
    }

    //validates that every matrix shares the time and asset axes
    pub fn build(self) -> Result<Dataset> {
        let malformed = |reason: String| BacktestError::MalformedDataset {
            dataset: self.name.clone(),
            reason,
        };

        if self.fields.is_empty() {
            return Err(malformed("dataset has no fields".to_string()));
        }
        if self.assets.is_empty() {
            return Err(malformed("dataset has no assets".to_string()));
        }
        if let Some(pos) = self.timestamps.windows(2).position(|w| w[0] >= w[1]) {
            return Err(malformed(format!(
                "timestamps are not strictly increasing at row {}",
                pos + 1
            )));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.assets.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(malformed(format!("duplicate asset '{}'", dup)));
        }

        let rows = self.timestamps.len();
        let cols = self.assets.len();
        for (field, matrix) in &self.fields {
            check_shape(&self.name, field, matrix, rows, cols)?;
        }
        if let Some(index) = &self.index {
            if index.len() != rows {
                return Err(malformed(format!(
                    "index series has {} rows, expected {}",
                    index.len(),
                    rows
                )));
            }
        }

        Ok(Dataset {
            name: self.name,
            timestamps: self.timestamps,
            assets: self.assets,
            fields: self.fields,
            index: self.index,
        })
    }
}

fn check_shape(dataset: &str, field: &Field, matrix: &FieldMatrix, rows: usize, cols: usize) -> Result<()> {
    if matrix.rows() != rows || matrix.cols() != cols {
        return Err(BacktestError::MalformedDataset {
            dataset: dataset.to_string(),
            reason: format!(
                "field '{}' is {}x{}, expected {}x{}",
                field,
                matrix.rows(),
                matrix.cols(),
                rows,
                cols
            ),
        });
    }
    Ok(())
}

//the slice of a dataset handed to a strategy at one rebalance step
#[derive(Debug, Clone)]
pub struct Window<'a> {
    dataset: &'a Dataset,
    bars: Range<usize>,
}

impl<'a> Window<'a> {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    //position of the window inside the parent dataset
    pub fn bars(&self) -> Range<usize> {
        self.bars.clone()
    }

    pub fn dataset_name(&self) -> &'a str {
        &self.dataset.name
    }

    pub fn n_assets(&self) -> usize {
        self.dataset.n_assets()
    }

    pub fn assets(&self) -> &'a [String] {
        &self.dataset.assets
    }

    pub fn timestamps(&self) -> &'a [DateTime<Utc>] {
        &self.dataset.timestamps[self.bars.clone()]
    }

    pub fn field(&self, field: &Field) -> Option<MatrixView<'a>> {
        self.dataset.fields.get(field).map(|m| m.view(self.bars.clone()))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'a Field, MatrixView<'a>)> + '_ {
        self.dataset
            .fields
            .iter()
            .map(move |(f, m)| (f, m.view(self.bars.clone())))
    }

    pub fn index(&self) -> Option<&'a [f64]> {
        self.dataset.index.as_deref().map(|s| &s[self.bars.clone()])
    }

    //simple per-bar returns of one field, one row shorter than the window
    pub fn returns(&self, field: &Field) -> Option<Vec<Vec<f64>>> {
        let view = self.field(field)?;
        let rows: Vec<&[f64]> = view.iter_rows().collect();
        Some(
            rows.windows(2)
                .map(|pair| {
                    pair[0]
                        .iter()
                        .zip(pair[1])
                        .map(|(&prev, &next)| simple_return(prev, next))
                        .collect()
                })
                .collect(),
        )
    }
}

//simple return, zero when the base price is unusable
pub fn simple_return(prev: f64, next: f64) -> f64 {
    if prev.is_finite() && next.is_finite() && prev > 0.0 {
        next / prev - 1.0
    } else {
        0.0
    }
}
