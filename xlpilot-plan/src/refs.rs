use serde::{Deserialize, Serialize};

const WILDCARDS: [&str; 9] = [
    "*",
    "all",
    "all columns",
    "every column",
    "所有列",
    "全部列",
    "每一列",
    "每列",
    "全部",
];

/// True for the spellings that mean "every column of the table".
pub fn is_wildcard(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    WILDCARDS.contains(&lowered.as_str())
}

/// One or more column names; a bare string is accepted for a single column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct ColumnList(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for ColumnList {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => ColumnList(vec![s]),
            OneOrMany::Many(v) => ColumnList(v),
        }
    }
}

impl ColumnList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ColumnList(iter.into_iter().map(Into::into).collect())
    }
}

/// The secondary table of a merge or lookup, named any way the planner likes.
/// After resolution only `table` is set, holding a binding id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(
        default,
        alias = "source_table",
        alias = "source_file",
        alias = "lookup_table",
        skip_serializing_if = "Option::is_none"
    )]
    pub table: Option<String>,
    #[serde(
        default,
        alias = "source_sheet",
        alias = "target_sheet",
        skip_serializing_if = "Option::is_none"
    )]
    pub sheet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_index: Option<usize>,
}

impl SourceRef {
    pub fn bound(id: impl Into<String>) -> Self {
        Self {
            table: Some(id.into()),
            sheet: None,
            source_file_index: None,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.table.is_none() && self.sheet.is_none() && self.source_file_index.is_none()
    }
}

/// Visitor over every column an operation reads.
///
/// Output names an operation creates are not visited.
pub trait ReferenceResolver {
    type Error;

    /// A column of the table the operation targets.
    fn column(&mut self, name: &str) -> Result<String, Self::Error>;

    /// A list of target columns. Implementations may expand wildcards.
    fn columns(&mut self, names: &[String]) -> Result<Vec<String>, Self::Error> {
        names.iter().map(|n| self.column(n)).collect()
    }

    /// A column of the secondary table.
    fn source_column(&mut self, name: &str) -> Result<String, Self::Error>;

    fn source_columns(&mut self, names: &[String]) -> Result<Vec<String>, Self::Error> {
        names.iter().map(|n| self.source_column(n)).collect()
    }
}
