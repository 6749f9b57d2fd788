#![forbid(unsafe_code)]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use xlpilot_types::{ColumnSchema, DataType, FileId, SheetSchema};

pub mod batch;
pub mod document;
pub mod presentation;
pub mod value;

pub use document::{SheetDocument, WorkbookDocument};
pub use presentation::{
    BorderStyle, ChartDirective, ChartKind, ChartPlacement, ChartSeries, ColumnFormat, FormatKind,
    Presentation, StyleDirective, StyleKind,
};
pub use value::{parse_date, Value};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid workbook document: {0}")]
    InvalidDocument(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Rows over a fixed, ordered column list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<FileId>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub presentation: Presentation,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            columns,
            rows: Vec::new(),
            presentation: Presentation::default(),
        }
    }

    /// Builds a table, padding or truncating every row to the column count.
    pub fn from_rows<S: Into<String>>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let mut table = Self::new(name, columns.into_iter().map(Into::into).collect());
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn with_source(mut self, source: FileId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.width(), Value::Null);
        self.rows.push(row);
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |r| r.get(idx).unwrap_or(&Value::Null))
    }

    /// Type shared by every non-null cell; mixed columns are text, all-null columns have none.
    pub fn column_type(&self, idx: usize) -> Option<DataType> {
        let mut seen: Option<DataType> = None;
        for ty in self.column(idx).filter_map(Value::data_type) {
            match seen {
                None => seen = Some(ty),
                Some(prev) if prev != ty => return Some(DataType::Text),
                _ => {}
            }
        }
        seen
    }

    pub fn insert_column(&mut self, at: usize, name: impl Into<String>, values: Vec<Value>) {
        let at = at.min(self.width());
        self.columns.insert(at, name.into());
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.insert(at, values.next().unwrap_or(Value::Null));
        }
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        let at = self.width();
        self.insert_column(at, name, values);
    }

    pub fn remove_column(&mut self, idx: usize) -> String {
        let name = self.columns.remove(idx);
        for row in &mut self.rows {
            if idx < row.len() {
                row.remove(idx);
            }
        }
        self.presentation.drop_column(&name);
        name
    }

    pub fn schema(&self, index: usize) -> SheetSchema {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let mut distinct = HashSet::new();
                let mut nullable = false;
                for v in self.column(idx) {
                    if v.is_null() {
                        nullable = true;
                    } else {
                        distinct.insert(v.key_text());
                    }
                }
                ColumnSchema {
                    name: name.clone(),
                    index: idx,
                    data_type: self.column_type(idx).unwrap_or(DataType::Text),
                    nullable,
                    unique_count: distinct.len(),
                }
            })
            .collect();
        SheetSchema {
            name: self.name.clone(),
            index,
            total_rows: self.row_count(),
            total_cols: self.width(),
            columns,
        }
    }

    /// Content hash over name, columns, typed cells and presentation.
    pub fn fingerprint(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.name.as_bytes());
        h.update([0u8]);
        for c in &self.columns {
            h.update(c.as_bytes());
            h.update([0x1fu8]);
        }
        for row in &self.rows {
            h.update([0x1eu8]);
            for cell in row {
                match cell {
                    Value::Null => h.update([b'n']),
                    Value::Bool(b) => h.update([b'b', *b as u8]),
                    Value::Number(n) => {
                        h.update([b'f']);
                        h.update(n.to_bits().to_be_bytes());
                    }
                    Value::Date(d) => {
                        h.update([b'd']);
                        h.update(d.to_string().as_bytes());
                    }
                    Value::Text(s) => {
                        h.update([b's']);
                        h.update(s.as_bytes());
                    }
                }
                h.update([0x1fu8]);
            }
        }
        h.update(serde_json::to_vec(&self.presentation).unwrap_or_default());
        format!("{:x}", h.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Table {
        Table::from_rows(
            "Sales",
            ["region", "amount"],
            vec![
                vec!["north".into(), 10.0.into()],
                vec!["south".into(), Value::Null],
                vec!["north".into()],
            ],
        )
    }

    #[test]
    fn rows_are_padded_to_width() {
        let t = sales();
        assert_eq!(t.rows[2], vec![Value::from("north"), Value::Null]);
    }

    #[test]
    fn schema_reports_types_and_nulls() {
        let schema = sales().schema(0);
        assert_eq!(schema.total_rows, 3);
        assert_eq!(schema.columns[0].unique_count, 2);
        assert_eq!(schema.columns[1].data_type, DataType::Number);
        assert!(schema.columns[1].nullable);
        assert!(!schema.columns[0].nullable);
    }

    #[test]
    fn mixed_columns_are_text() {
        let t = Table::from_rows("t", ["x"], vec![vec![1.0.into()], vec!["a".into()]]);
        assert_eq!(t.column_type(0), Some(DataType::Text));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = sales();
        let mut b = sales();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.rows[0][1] = Value::Number(11.0);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn column_insert_and_remove() {
        let mut t = sales();
        t.insert_column(1, "rep", vec!["ann".into()]);
        assert_eq!(t.columns, vec!["region", "rep", "amount"]);
        assert_eq!(t.rows[1][1], Value::Null);
        assert_eq!(t.remove_column(1), "rep");
        assert_eq!(t.width(), 2);
    }
}
