//! JSON workbook document used by the HTTP and CLI transports.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use xlpilot_types::FileId;

use crate::{Presentation, Table, TableError, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetDocument {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Presentation::is_empty")]
    pub presentation: Presentation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkbookDocument {
    pub file_name: String,
    pub sheets: Vec<SheetDocument>,
}

/// Blank headers become `Unnamed: N`, repeated headers get `.1`, `.2`, ...
fn normalize_headers(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(columns.len());
    for (idx, raw) in columns.into_iter().enumerate() {
        let base = if raw.trim().is_empty() {
            format!("Unnamed: {idx}")
        } else {
            raw
        };
        let mut name = base.clone();
        if taken.contains(&name) {
            let n = seen.entry(base.clone()).or_insert(0);
            loop {
                *n += 1;
                name = format!("{base}.{n}");
                if !taken.contains(&name) {
                    break;
                }
            }
        }
        taken.insert(name.clone());
        out.push(name);
    }
    out
}

impl SheetDocument {
    pub fn into_table(self, source: Option<FileId>) -> Table {
        let mut table = Table::from_rows(self.name, normalize_headers(self.columns), self.rows);
        table.source = source;
        table.presentation = self.presentation;
        table
    }

    pub fn from_table(table: &Table) -> Self {
        Self {
            name: table.name.clone(),
            columns: table.columns.clone(),
            rows: table.rows.clone(),
            presentation: table.presentation.clone(),
        }
    }
}

impl WorkbookDocument {
    pub fn validate(&self) -> Result<(), TableError> {
        if self.file_name.trim().is_empty() {
            return Err(TableError::InvalidDocument("file_name is empty".into()));
        }
        if self.sheets.is_empty() {
            return Err(TableError::InvalidDocument("workbook has no sheets".into()));
        }
        let mut names = HashSet::new();
        for sheet in &self.sheets {
            if !names.insert(sheet.name.as_str()) {
                return Err(TableError::InvalidDocument(format!(
                    "duplicate sheet name `{}`",
                    sheet.name
                )));
            }
            if let Some((i, row)) = sheet
                .rows
                .iter()
                .enumerate()
                .find(|(_, r)| r.len() > sheet.columns.len())
            {
                return Err(TableError::InvalidDocument(format!(
                    "sheet `{}` row {} has {} cells for {} columns",
                    sheet.name,
                    i + 1,
                    row.len(),
                    sheet.columns.len()
                )));
            }
        }
        Ok(())
    }

    pub fn into_tables(self, source: FileId) -> Vec<Table> {
        self.sheets
            .into_iter()
            .map(|s| s.into_table(Some(source)))
            .collect()
    }

    pub fn from_tables(file_name: impl Into<String>, tables: &[Table]) -> Self {
        Self {
            file_name: file_name.into(),
            sheets: tables.iter().map(SheetDocument::from_table).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_and_blank_headers_are_renamed() {
        let cols = normalize_headers(vec!["amt".into(), "amt".into(), "".into(), "amt".into()]);
        assert_eq!(cols, vec!["amt", "amt.1", "Unnamed: 2", "amt.2"]);
    }

    #[test]
    fn overlong_rows_are_rejected() {
        let doc: WorkbookDocument = serde_json::from_str(
            r#"{"file_name": "a.xlsx",
                "sheets": [{"name": "S", "columns": ["x"], "rows": [[1, 2]]}]}"#,
        )
        .unwrap();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn sheets_become_tables_with_provenance() {
        let doc: WorkbookDocument = serde_json::from_str(
            r#"{"file_name": "a.xlsx",
                "sheets": [{"name": "S", "columns": ["x", "y"], "rows": [[1]]}]}"#,
        )
        .unwrap();
        doc.validate().unwrap();
        let id = FileId::new();
        let tables = doc.into_tables(id);
        assert_eq!(tables[0].source, Some(id));
        assert_eq!(tables[0].rows[0], vec![Value::Number(1.0), Value::Null]);
    }
}
