use std::fmt;

use serde::{Deserialize, Serialize};
use xlpilot_table::{ChartKind, ChartPlacement, FormatKind, StyleDirective};

use crate::condition::Condition;
use crate::expr::Expression;
use crate::lenient;
use crate::refs::{is_wildcard, ColumnList, ReferenceResolver, SourceRef};

/// Discriminant of [`Operation`], as planners name it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Filter,
    Sort,
    AddColumn,
    DeleteColumn,
    SplitColumn,
    MergeColumns,
    DeleteRows,
    Deduplicate,
    Replace,
    Fill,
    Calculate,
    Format,
    Style,
    LookupJoin,
    Pivot,
    CreateChart,
    MergeVertical,
    MergeHorizontal,
}

impl OperationKind {
    pub const ALL: [OperationKind; 18] = [
        OperationKind::Filter,
        OperationKind::Sort,
        OperationKind::AddColumn,
        OperationKind::DeleteColumn,
        OperationKind::SplitColumn,
        OperationKind::MergeColumns,
        OperationKind::DeleteRows,
        OperationKind::Deduplicate,
        OperationKind::Replace,
        OperationKind::Fill,
        OperationKind::Calculate,
        OperationKind::Format,
        OperationKind::Style,
        OperationKind::LookupJoin,
        OperationKind::Pivot,
        OperationKind::CreateChart,
        OperationKind::MergeVertical,
        OperationKind::MergeHorizontal,
    ];

    /// Wire tag, e.g. `ADD_COLUMN`.
    pub fn tag(&self) -> &'static str {
        match self {
            OperationKind::Filter => "FILTER",
            OperationKind::Sort => "SORT",
            OperationKind::AddColumn => "ADD_COLUMN",
            OperationKind::DeleteColumn => "DELETE_COLUMN",
            OperationKind::SplitColumn => "SPLIT_COLUMN",
            OperationKind::MergeColumns => "MERGE_COLUMNS",
            OperationKind::DeleteRows => "DELETE_ROWS",
            OperationKind::Deduplicate => "DEDUPLICATE",
            OperationKind::Replace => "REPLACE",
            OperationKind::Fill => "FILL",
            OperationKind::Calculate => "CALCULATE",
            OperationKind::Format => "FORMAT",
            OperationKind::Style => "STYLE",
            OperationKind::LookupJoin => "LOOKUP_JOIN",
            OperationKind::Pivot => "PIVOT",
            OperationKind::CreateChart => "CREATE_CHART",
            OperationKind::MergeVertical => "MERGE_VERTICAL",
            OperationKind::MergeHorizontal => "MERGE_HORIZONTAL",
        }
    }

    /// Human name used in logs and error messages, e.g. `add-column`.
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Filter => "filter",
            OperationKind::Sort => "sort",
            OperationKind::AddColumn => "add-column",
            OperationKind::DeleteColumn => "delete-column",
            OperationKind::SplitColumn => "split-column",
            OperationKind::MergeColumns => "merge-columns",
            OperationKind::DeleteRows => "delete-rows",
            OperationKind::Deduplicate => "deduplicate",
            OperationKind::Replace => "replace",
            OperationKind::Fill => "fill",
            OperationKind::Calculate => "calculate",
            OperationKind::Format => "format",
            OperationKind::Style => "style",
            OperationKind::LookupJoin => "lookup-join",
            OperationKind::Pivot => "pivot",
            OperationKind::CreateChart => "create-chart",
            OperationKind::MergeVertical => "merge-vertical",
            OperationKind::MergeHorizontal => "merge-horizontal",
        }
    }

    /// Case-insensitive; `-`, `_` and spaces are interchangeable; legacy names accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        if let Some(kind) = Self::ALL.iter().find(|k| k.tag() == norm) {
            return Some(*kind);
        }
        let kind = match norm.as_str() {
            "VLOOKUP" | "LOOKUP" | "JOIN" => OperationKind::LookupJoin,
            "DEDUPE" | "DROP_DUPLICATES" | "REMOVE_DUPLICATES" => OperationKind::Deduplicate,
            "DELETE_COLUMNS" | "DROP_COLUMN" | "DROP_COLUMNS" => OperationKind::DeleteColumn,
            "DELETE_ROW" | "DROP_ROWS" => OperationKind::DeleteRows,
            "SPLIT" => OperationKind::SplitColumn,
            "MERGE_COLUMN" | "CONCAT_COLUMNS" => OperationKind::MergeColumns,
            "FILL_NA" | "FILLNA" | "FILL_NULL" => OperationKind::Fill,
            "CHART" => OperationKind::CreateChart,
            "APPEND" | "UNION" | "CONCAT" => OperationKind::MergeVertical,
            "SUMMARY" | "AGGREGATE" => OperationKind::Calculate,
            "PIVOT_TABLE" => OperationKind::Pivot,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ascending", alias = "ASC")]
    Asc,
    #[serde(alias = "descending", alias = "DESC")]
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default, alias = "order")]
    pub direction: SortDirection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "SortRepr")]
pub struct SortParams {
    pub keys: Vec<SortKey>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SortRepr {
    Keys { keys: Vec<SortKey> },
    Single(SortKey),
}

impl From<SortRepr> for SortParams {
    fn from(repr: SortRepr) -> Self {
        match repr {
            SortRepr::Keys { keys } => SortParams { keys },
            SortRepr::Single(key) => SortParams { keys: vec![key] },
        }
    }
}

/// Where `add-column` places its output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnPosition {
    #[default]
    End,
    Start,
    After(String),
    Before(String),
}

impl TryFrom<String> for ColumnPosition {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let trimmed = raw.trim();
        if let Some((keyword, column)) = trimmed.split_once(':') {
            let column = column.trim().to_string();
            return match keyword.trim().to_ascii_lowercase().as_str() {
                "after" => Ok(ColumnPosition::After(column)),
                "before" => Ok(ColumnPosition::Before(column)),
                _ => Err(format!("unknown column position `{raw}`")),
            };
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "end" | "last" => Ok(ColumnPosition::End),
            "start" | "first" | "beginning" => Ok(ColumnPosition::Start),
            _ => Err(format!("unknown column position `{raw}`")),
        }
    }
}

impl From<ColumnPosition> for String {
    fn from(p: ColumnPosition) -> Self {
        match p {
            ColumnPosition::End => "end".into(),
            ColumnPosition::Start => "start".into(),
            ColumnPosition::After(c) => format!("after:{c}"),
            ColumnPosition::Before(c) => format!("before:{c}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddColumnParams {
    #[serde(alias = "column", alias = "new_column")]
    pub name: String,
    #[serde(alias = "formula", alias = "expr")]
    pub expression: Expression,
    #[serde(default)]
    pub position: ColumnPosition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteColumnParams {
    #[serde(alias = "column")]
    pub columns: ColumnList,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitColumnParams {
    pub column: String,
    #[serde(alias = "separator", alias = "sep")]
    pub delimiter: String,
    #[serde(alias = "new_column_names", alias = "into")]
    pub new_columns: Vec<String>,
    #[serde(default)]
    pub drop_original: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeColumnsParams {
    pub columns: ColumnList,
    #[serde(alias = "new_column", alias = "name")]
    pub new_name: String,
    #[serde(default, alias = "separator")]
    pub delimiter: String,
    #[serde(default = "default_true")]
    pub keep_original: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepPolicy {
    #[default]
    First,
    Last,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicateParams {
    /// Key columns; empty means every column.
    #[serde(default, alias = "subset")]
    pub columns: ColumnList,
    #[serde(default)]
    pub keep: KeepPolicy,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplaceMode {
    #[default]
    Substring,
    #[serde(alias = "whole", alias = "cell")]
    Exact,
    #[serde(alias = "pattern")]
    Regex,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "ReplaceRepr")]
pub struct ReplaceParams {
    pub columns: ColumnList,
    pub old_value: String,
    pub new_value: String,
    pub mode: ReplaceMode,
}

#[derive(Deserialize)]
struct ReplaceRepr {
    #[serde(alias = "column")]
    columns: ColumnList,
    #[serde(alias = "find", alias = "pattern", deserialize_with = "lenient::string")]
    old_value: String,
    #[serde(
        default,
        alias = "replacement",
        alias = "replace_with",
        deserialize_with = "lenient::string"
    )]
    new_value: String,
    #[serde(default)]
    mode: ReplaceMode,
    #[serde(default)]
    regex: bool,
}

impl From<ReplaceRepr> for ReplaceParams {
    fn from(r: ReplaceRepr) -> Self {
        ReplaceParams {
            columns: r.columns,
            old_value: r.old_value,
            new_value: r.new_value,
            mode: if r.regex { ReplaceMode::Regex } else { r.mode },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    #[default]
    #[serde(alias = "value", alias = "const")]
    Constant,
    #[serde(alias = "ffill", alias = "forward_fill", alias = "pad")]
    Forward,
    #[serde(alias = "bfill", alias = "backward_fill")]
    Backward,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FillParams {
    #[serde(alias = "column")]
    pub columns: ColumnList,
    #[serde(default)]
    pub method: FillMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    #[default]
    Sum,
    #[serde(alias = "mean", alias = "average")]
    Avg,
    Count,
    Min,
    Max,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    #[serde(default, alias = "func", alias = "agg")]
    pub function: AggFunc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculateParams {
    #[serde(alias = "aggregations")]
    pub operations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormatParams {
    #[serde(alias = "column")]
    pub columns: ColumnList,
    pub format_type: FormatKind,
    #[serde(default, alias = "pattern", skip_serializing_if = "Option::is_none")]
    pub format_string: Option<String>,
}

/// What to do when a key matches more than one row of the secondary table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiMatch {
    #[default]
    First,
    Last,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupJoinParams {
    #[serde(alias = "lookup_column")]
    pub key_column: String,
    #[serde(flatten)]
    pub source: SourceRef,
    #[serde(default, alias = "target_lookup_column", skip_serializing_if = "Option::is_none")]
    pub source_key_column: Option<String>,
    #[serde(alias = "target_return_column", alias = "return_column")]
    pub return_columns: ColumnList,
    #[serde(default, alias = "new_column_name", alias = "new_column")]
    pub new_names: ColumnList,
    #[serde(default)]
    pub on_multiple: MultiMatch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PivotParams {
    #[serde(alias = "rows")]
    pub index: ColumnList,
    /// Optional column axis; at most one column.
    #[serde(default)]
    pub columns: ColumnList,
    #[serde(alias = "value")]
    pub values: ColumnList,
    #[serde(default, alias = "agg", alias = "function")]
    pub aggfunc: AggFunc,
    /// Binding id of the produced table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PivotParams {
    pub fn output_id(&self, target: &str) -> String {
        self.output
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{target}_pivot"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartParams {
    pub chart_type: ChartKind,
    #[serde(alias = "columns", alias = "y_columns")]
    pub data_columns: ColumnList,
    #[serde(
        default,
        alias = "x_column",
        alias = "category_column",
        skip_serializing_if = "Option::is_none"
    )]
    pub label_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub position: ChartPlacement,
    #[serde(default = "default_chart_width")]
    pub width: f64,
    #[serde(default = "default_chart_height")]
    pub height: f64,
    #[serde(default = "default_true")]
    pub show_values: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeVerticalParams {
    #[serde(flatten)]
    pub source: SourceRef,
    #[serde(default = "default_true", alias = "skip_header")]
    pub skip_header_rows: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeHorizontalParams {
    #[serde(flatten)]
    pub source: SourceRef,
    #[serde(alias = "on", alias = "key")]
    pub key_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key_column: Option<String>,
    /// Secondary columns to bring over; empty means all but the key.
    #[serde(default)]
    pub columns_to_add: ColumnList,
    #[serde(default)]
    pub on_multiple: MultiMatch,
}

fn default_true() -> bool {
    true
}

fn default_chart_width() -> f64 {
    15.0
}

fn default_chart_height() -> f64 {
    10.0
}

/// One typed edit. Serialized as `{"type": "...", "params": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Filter(Condition),
    Sort(SortParams),
    AddColumn(AddColumnParams),
    DeleteColumn(DeleteColumnParams),
    SplitColumn(SplitColumnParams),
    MergeColumns(MergeColumnsParams),
    DeleteRows(Condition),
    Deduplicate(DeduplicateParams),
    Replace(ReplaceParams),
    Fill(FillParams),
    Calculate(CalculateParams),
    Format(FormatParams),
    Style(StyleDirective),
    LookupJoin(LookupJoinParams),
    Pivot(PivotParams),
    CreateChart(ChartParams),
    MergeVertical(MergeVerticalParams),
    MergeHorizontal(MergeHorizontalParams),
}

fn require(cond: bool, msg: impl FnOnce() -> String) -> Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(msg())
    }
}

fn non_blank(list: &ColumnList, what: &str) -> Result<(), String> {
    require(!list.is_empty(), || format!("{what} must name at least one column"))?;
    require(list.iter().all(|c| !c.trim().is_empty()), || {
        format!("{what} contains a blank column name")
    })
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Filter(_) => OperationKind::Filter,
            Operation::Sort(_) => OperationKind::Sort,
            Operation::AddColumn(_) => OperationKind::AddColumn,
            Operation::DeleteColumn(_) => OperationKind::DeleteColumn,
            Operation::SplitColumn(_) => OperationKind::SplitColumn,
            Operation::MergeColumns(_) => OperationKind::MergeColumns,
            Operation::DeleteRows(_) => OperationKind::DeleteRows,
            Operation::Deduplicate(_) => OperationKind::Deduplicate,
            Operation::Replace(_) => OperationKind::Replace,
            Operation::Fill(_) => OperationKind::Fill,
            Operation::Calculate(_) => OperationKind::Calculate,
            Operation::Format(_) => OperationKind::Format,
            Operation::Style(_) => OperationKind::Style,
            Operation::LookupJoin(_) => OperationKind::LookupJoin,
            Operation::Pivot(_) => OperationKind::Pivot,
            Operation::CreateChart(_) => OperationKind::CreateChart,
            Operation::MergeVertical(_) => OperationKind::MergeVertical,
            Operation::MergeHorizontal(_) => OperationKind::MergeHorizontal,
        }
    }

    /// Structural checks that do not need a schema.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Operation::Filter(c) | Operation::DeleteRows(c) => c.validate(),
            Operation::Sort(p) => {
                require(!p.keys.is_empty(), || "sort needs at least one key".into())?;
                require(p.keys.iter().all(|k| !k.column.trim().is_empty()), || {
                    "sort key without a column".into()
                })
            }
            Operation::AddColumn(p) => {
                require(!p.name.trim().is_empty(), || "new column name is empty".into())
            }
            Operation::DeleteColumn(p) => non_blank(&p.columns, "columns"),
            Operation::SplitColumn(p) => {
                require(!p.delimiter.is_empty(), || "delimiter is empty".into())?;
                require(!p.new_columns.is_empty(), || "new_columns is empty".into())?;
                require(p.new_columns.iter().all(|c| !c.trim().is_empty()), || {
                    "new_columns contains a blank name".into()
                })
            }
            Operation::MergeColumns(p) => {
                non_blank(&p.columns, "columns")?;
                require(!p.new_name.trim().is_empty(), || "new_name is empty".into())
            }
            Operation::Deduplicate(_) => Ok(()),
            Operation::Replace(p) => {
                non_blank(&p.columns, "columns")?;
                require(!p.old_value.is_empty() || p.mode == ReplaceMode::Exact, || {
                    "old_value is empty".into()
                })?;
                if p.mode == ReplaceMode::Regex {
                    regex::Regex::new(&p.old_value)
                        .map_err(|e| format!("invalid pattern `{}`: {e}", p.old_value))?;
                }
                Ok(())
            }
            Operation::Fill(p) => {
                non_blank(&p.columns, "columns")?;
                let has_value = p.value.as_ref().map_or(false, |v| !v.is_null());
                require(p.method != FillMethod::Constant || has_value, || {
                    "constant fill needs a value".into()
                })
            }
            Operation::Calculate(p) => {
                require(!p.operations.is_empty(), || {
                    "calculate needs at least one aggregation".into()
                })
            }
            Operation::Format(p) => non_blank(&p.columns, "columns"),
            Operation::Style(s) => match &s.range {
                Some(range) => {
                    require(valid_a1_range(range), || format!("invalid range `{range}`"))
                }
                None => Ok(()),
            },
            Operation::LookupJoin(p) => {
                require(!p.key_column.trim().is_empty(), || "key_column is empty".into())?;
                non_blank(&p.return_columns, "return_columns")?;
                require(p.new_names.is_empty() || p.new_names.len() == p.return_columns.len(), || {
                    "new_names must match return_columns one to one".into()
                })
            }
            Operation::Pivot(p) => {
                non_blank(&p.index, "index")?;
                require(p.columns.len() <= 1, || "pivot supports one column axis".into())?;
                require(p.values.len() == 1, || "pivot needs exactly one values column".into())
            }
            Operation::CreateChart(p) => {
                non_blank(&p.data_columns, "data_columns")?;
                let scatter = p.chart_type == xlpilot_table::ChartKind::Scatter;
                require(!scatter || p.data_columns.len() >= 2, || {
                    "scatter charts need two data columns".into()
                })?;
                require(p.width > 0.0 && p.height > 0.0, || "chart size must be positive".into())
            }
            Operation::MergeVertical(_) => Ok(()),
            Operation::MergeHorizontal(p) => {
                require(!p.key_column.trim().is_empty(), || "key_column is empty".into())
            }
        }
    }

    /// The secondary table, for operations that read two tables.
    pub fn source(&self) -> Option<&SourceRef> {
        match self {
            Operation::LookupJoin(p) => Some(&p.source),
            Operation::MergeVertical(p) => Some(&p.source),
            Operation::MergeHorizontal(p) => Some(&p.source),
            _ => None,
        }
    }

    pub fn source_mut(&mut self) -> Option<&mut SourceRef> {
        match self {
            Operation::LookupJoin(p) => Some(&mut p.source),
            Operation::MergeVertical(p) => Some(&mut p.source),
            Operation::MergeHorizontal(p) => Some(&mut p.source),
            _ => None,
        }
    }

    /// Binding id of the bound secondary table, once resolved.
    pub fn source_binding(&self) -> Option<&str> {
        self.source().and_then(|s| s.table.as_deref())
    }

    /// Passes every column reference through `r`, replacing it with the result.
    pub fn visit_references<R: ReferenceResolver>(&mut self, r: &mut R) -> Result<(), R::Error> {
        fn list<R: ReferenceResolver>(r: &mut R, l: &mut ColumnList) -> Result<(), R::Error> {
            l.0 = r.columns(&l.0)?;
            Ok(())
        }

        match self {
            Operation::Filter(c) | Operation::DeleteRows(c) => c.visit_columns(&mut |col| {
                *col = r.column(col)?;
                Ok(())
            }),
            Operation::Sort(p) => {
                for key in &mut p.keys {
                    key.column = r.column(&key.column)?;
                }
                Ok(())
            }
            Operation::AddColumn(p) => {
                p.expression.0.rewrite_columns(&mut |c| r.column(c))?;
                match &mut p.position {
                    ColumnPosition::After(c) | ColumnPosition::Before(c) => *c = r.column(c)?,
                    _ => {}
                }
                Ok(())
            }
            Operation::DeleteColumn(p) => list(r, &mut p.columns),
            Operation::SplitColumn(p) => {
                p.column = r.column(&p.column)?;
                Ok(())
            }
            Operation::MergeColumns(p) => list(r, &mut p.columns),
            Operation::Deduplicate(p) => {
                if !p.columns.is_empty() {
                    list(r, &mut p.columns)?;
                }
                Ok(())
            }
            Operation::Replace(p) => list(r, &mut p.columns),
            Operation::Fill(p) => list(r, &mut p.columns),
            Operation::Calculate(p) => {
                for agg in &mut p.operations {
                    agg.column = r.column(&agg.column)?;
                }
                Ok(())
            }
            Operation::Format(p) => list(r, &mut p.columns),
            Operation::Style(_) => Ok(()),
            Operation::LookupJoin(p) => {
                let key = p.source_key_column.clone().unwrap_or_else(|| p.key_column.clone());
                p.key_column = r.column(&p.key_column)?;
                p.source_key_column = Some(r.source_column(&key)?);
                p.return_columns.0 = r.source_columns(&p.return_columns.0)?;
                Ok(())
            }
            Operation::Pivot(p) => {
                list(r, &mut p.index)?;
                if !p.columns.is_empty() {
                    list(r, &mut p.columns)?;
                }
                list(r, &mut p.values)
            }
            Operation::CreateChart(p) => {
                list(r, &mut p.data_columns)?;
                if let Some(label) = &mut p.label_column {
                    *label = r.column(label)?;
                }
                Ok(())
            }
            Operation::MergeVertical(_) => Ok(()),
            Operation::MergeHorizontal(p) => {
                let key = p.source_key_column.clone().unwrap_or_else(|| p.key_column.clone());
                p.key_column = r.column(&p.key_column)?;
                p.source_key_column = Some(r.source_column(&key)?);
                let wildcard = p.columns_to_add.iter().any(|c| is_wildcard(c));
                if !p.columns_to_add.is_empty() && !wildcard {
                    p.columns_to_add.0 = r.source_columns(&p.columns_to_add.0)?;
                } else {
                    p.columns_to_add = ColumnList::default();
                }
                Ok(())
            }
        }
    }
}

fn valid_a1_range(range: &str) -> bool {
    let cell = |s: &str| {
        let s = s.trim().replace('$', "");
        let letters = s.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let digits = &s[letters..];
        letters > 0
            && letters <= 3
            && !digits.is_empty()
            && digits.chars().all(|c| c.is_ascii_digit())
    };
    match range.split_once(':') {
        Some((a, b)) => cell(a) && cell(b),
        None => cell(range),
    }
}
