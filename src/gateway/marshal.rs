//! Result marshaling: columnar shape, truncation, and per-cell export normalization.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};
use serde_json::Value;

use crate::value::CellValue;

/// Executor output before marshaling.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// At most `max_rows + 1` fetched rows.
    Rows { columns: Vec<String>, rows: Vec<Vec<CellValue>> },
    /// Committed write; engine-reported affected-row count.
    Affected(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: u64,
    pub truncated: bool,
}

impl QueryResult {
    pub fn from_raw(raw: RawResult, max_rows: usize) -> Self {
        match raw {
            RawResult::Rows { columns, mut rows } => {
                let truncated = rows.len() > max_rows;
                rows.truncate(max_rows);
                Self { columns: unique_columns(columns), row_count: rows.len() as u64, rows, truncated }
            }
            RawResult::Affected(n) => Self {
                columns: vec!["status".to_string()],
                rows: vec![vec![CellValue::Text("success".to_string())]],
                row_count: n,
                truncated: false,
            },
        }
    }
}

/// Repeated names get `_1`, `_2`, ... so every row maps each column exactly once.
pub fn unique_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(columns.len());
    columns
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while seen.contains(&candidate) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

struct RowMap<'a> {
    columns: &'a [String],
    cells: &'a [CellValue],
}

impl Serialize for RowMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (idx, col) in self.columns.iter().enumerate() {
            map.serialize_entry(col, self.cells.get(idx).unwrap_or(&CellValue::Null))?;
        }
        map.end()
    }
}

struct DataRows<'a>(&'a QueryResult);

impl Serialize for DataRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let columns = &self.0.columns;
        serializer.collect_seq(self.0.rows.iter().map(|cells| RowMap { columns, cells }))
    }
}

/// `{columns, data: [{col: value, ...}], row_count, truncated}` with keys in column order.
impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("QueryResult", 4)?;
        s.serialize_field("columns", &self.columns)?;
        s.serialize_field("data", &DataRows(self))?;
        s.serialize_field("row_count", &self.row_count)?;
        s.serialize_field("truncated", &self.truncated)?;
        s.end()
    }
}

/// A spreadsheet-ready cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportCell {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    /// Always naive; zoned timestamps are converted to UTC first.
    DateTime(NaiveDateTime),
}

pub fn normalize_cell(v: &CellValue) -> ExportCell {
    match v {
        CellValue::Null => ExportCell::Empty,
        CellValue::Bool(b) => ExportCell::Bool(*b),
        CellValue::Int(i) => ExportCell::Number(*i as f64),
        CellValue::Float(f) if f.is_finite() => ExportCell::Number(*f),
        CellValue::Numeric(s) => match s.parse::<f64>() {
            Ok(f) if f.is_finite() => ExportCell::Number(f),
            _ => ExportCell::Text(s.clone()),
        },
        CellValue::Text(s) => ExportCell::Text(s.clone()),
        CellValue::Date(d) => ExportCell::Date(*d),
        CellValue::Timestamp(ts) => ExportCell::DateTime(*ts),
        CellValue::TimestampTz(ts) => ExportCell::DateTime(ts.naive_utc()),
        CellValue::Json(j) => match j {
            Value::Null => ExportCell::Empty,
            Value::Bool(b) => ExportCell::Bool(*b),
            Value::Number(n) => n.as_f64().map(ExportCell::Number).unwrap_or_else(|| ExportCell::Text(n.to_string())),
            Value::String(s) => ExportCell::Text(s.clone()),
            compound => ExportCell::Text(compound.to_string()),
        },
        other => ExportCell::Text(other.display_text()),
    }
}
