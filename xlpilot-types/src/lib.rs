use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod clarify;
pub mod error;

pub use clarify::{Answer, Answers, ClarificationOption, ClarificationQuestion, QuestionKind, Turn};
pub use error::CopilotError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an uploaded or produced workbook.
    FileId
);
uuid_id!(
    /// Identifier of one refinement dialogue.
    SessionId
);

/// Inferred type of a column.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Number,
    Date,
    Boolean,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub index: usize,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique_count: usize,
}

/// Structural description of one sheet. Never mutated once derived.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetSchema {
    pub name: String,
    pub index: usize,
    pub total_rows: usize,
    pub total_cols: usize,
    pub columns: Vec<ColumnSchema>,
}

impl SheetSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSchema {
    pub file_id: FileId,
    pub file_name: String,
    pub active_sheet: String,
    pub sheets: Vec<SheetSchema>,
}

impl FileSchema {
    pub fn sheet(&self, name: &str) -> Option<&SheetSchema> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// The sheet operations target when a plan does not name one.
    pub fn active(&self) -> Option<&SheetSchema> {
        self.sheet(&self.active_sheet).or_else(|| self.sheets.first())
    }

    /// File name without its extension, as users tend to type it.
    pub fn stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(pos) if pos > 0 => &self.file_name[..pos],
            _ => &self.file_name,
        }
    }
}
