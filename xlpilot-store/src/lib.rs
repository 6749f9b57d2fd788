#![forbid(unsafe_code)]

//! Table storage: where uploaded and produced workbooks live between calls.
//! This is the seam to workbook I/O; files enter and leave as Arrow batches
//! or JSON documents.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use xlpilot_table::{Table, TableError, WorkbookDocument};
use xlpilot_types::{FileId, FileSchema};

pub type ArrowBatchHandle = Arc<RecordBatch>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file {0} not found")]
    NotFound(FileId),
    #[error("invalid workbook: {0}")]
    Invalid(String),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// A workbook as a list of sheets. The first sheet is the active one.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredFile {
    pub file_id: FileId,
    pub file_name: String,
    pub sheets: Vec<Table>,
}

impl StoredFile {
    pub fn new(
        file_id: FileId,
        file_name: impl Into<String>,
        sheets: Vec<Table>,
    ) -> Result<Self, StoreError> {
        if sheets.is_empty() {
            return Err(StoreError::Invalid("workbook has no sheets".into()));
        }
        let sheets = sheets
            .into_iter()
            .map(|mut t| {
                t.source = Some(file_id);
                t
            })
            .collect();
        Ok(Self {
            file_id,
            file_name: file_name.into(),
            sheets,
        })
    }

    pub fn from_document(file_id: FileId, doc: WorkbookDocument) -> Result<Self, StoreError> {
        doc.validate()?;
        let file_name = doc.file_name.clone();
        Self::new(file_id, file_name, doc.into_tables(file_id))
    }

    pub fn to_document(&self) -> WorkbookDocument {
        WorkbookDocument::from_tables(self.file_name.clone(), &self.sheets)
    }

    pub fn from_batches(
        file_id: FileId,
        file_name: impl Into<String>,
        batches: &[(String, ArrowBatchHandle)],
    ) -> Result<Self, StoreError> {
        let sheets = batches
            .iter()
            .map(|(name, batch)| Table::from_record_batch(name.clone(), batch))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(file_id, file_name, sheets)
    }

    pub fn to_batches(&self) -> Result<Vec<(String, ArrowBatchHandle)>, StoreError> {
        self.sheets
            .iter()
            .map(|t| Ok((t.name.clone(), Arc::new(t.to_record_batch()?))))
            .collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Table> {
        self.sheets.iter().find(|t| t.name == name)
    }

    pub fn active(&self) -> Option<&Table> {
        self.sheets.first()
    }

    pub fn schema(&self) -> FileSchema {
        FileSchema {
            file_id: self.file_id,
            file_name: self.file_name.clone(),
            active_sheet: self.active().map(|t| t.name.clone()).unwrap_or_default(),
            sheets: self.sheets.iter().enumerate().map(|(i, t)| t.schema(i)).collect(),
        }
    }
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn insert(&self, file: StoredFile) -> Result<FileId, StoreError>;

    async fn get(&self, id: FileId) -> Result<Arc<StoredFile>, StoreError>;

    async fn remove(&self, id: FileId) -> Result<(), StoreError>;

    async fn schema(&self, id: FileId) -> Result<FileSchema, StoreError> {
        Ok(self.get(id).await?.schema())
    }

    /// Copies a stored file under a fresh id.
    async fn duplicate(&self, id: FileId) -> Result<FileId, StoreError> {
        let original = self.get(id).await?;
        let copy = StoredFile::new(
            FileId::new(),
            original.file_name.clone(),
            original.sheets.clone(),
        )?;
        self.insert(copy).await
    }
}

/// Process-local store. Stored files are immutable; replacing one means inserting a new id.
#[derive(Default)]
pub struct InMemoryTableStore {
    files: Mutex<HashMap<FileId, Arc<StoredFile>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn insert(&self, file: StoredFile) -> Result<FileId, StoreError> {
        let id = file.file_id;
        debug!(file = %id, name = %file.file_name, sheets = file.sheets.len(), "file stored");
        self.files.lock().await.insert(id, Arc::new(file));
        Ok(id)
    }

    async fn get(&self, id: FileId) -> Result<Arc<StoredFile>, StoreError> {
        self.files
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn remove(&self, id: FileId) -> Result<(), StoreError> {
        self.files
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlpilot_table::Value;

    fn file() -> StoredFile {
        let t = Table::from_rows(
            "Data",
            ["sku", "qty"],
            vec![vec!["A".into(), 1.0.into()], vec!["B".into(), Value::Null]],
        );
        StoredFile::new(FileId::new(), "stock.xlsx", vec![t]).unwrap()
    }

    #[tokio::test]
    async fn insert_get_and_schema() {
        let store = InMemoryTableStore::new();
        let f = file();
        let id = store.insert(f.clone()).await.unwrap();
        let got = store.get(id).await.unwrap();
        assert_eq!(*got, f);
        assert_eq!(got.sheets[0].source, Some(id));

        let schema = store.schema(id).await.unwrap();
        assert_eq!(schema.active_sheet, "Data");
        assert!(schema.sheets[0].columns[1].nullable);
    }

    #[tokio::test]
    async fn duplicate_gets_new_id_and_provenance() {
        let store = InMemoryTableStore::new();
        let id = store.insert(file()).await.unwrap();
        let copy = store.duplicate(id).await.unwrap();
        assert_ne!(copy, id);
        let got = store.get(copy).await.unwrap();
        assert_eq!(got.sheets[0].source, Some(copy));
        assert_eq!(got.sheets[0].rows, store.get(id).await.unwrap().sheets[0].rows);
    }

    #[tokio::test]
    async fn missing_files_are_reported() {
        let store = InMemoryTableStore::new();
        let id = FileId::new();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.remove(id).await, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn batches_carry_every_sheet() {
        let f = file();
        let batches = f.to_batches().unwrap();
        assert_eq!(batches.len(), 1);
        let back = StoredFile::from_batches(f.file_id, "stock.xlsx", &batches).unwrap();
        assert_eq!(back.sheets[0].columns, vec!["sku", "qty"]);
        assert_eq!(back.sheets[0].row_count(), 2);
    }

    #[test]
    fn empty_workbooks_are_rejected() {
        assert!(matches!(
            StoredFile::new(FileId::new(), "x.xlsx", Vec::new()),
            Err(StoreError::Invalid(_))
        ));
    }
}
