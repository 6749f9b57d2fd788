//! Presentation metadata. Carried alongside cell values and never consulted by data operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Number,
    Date,
    #[serde(alias = "percent")]
    Percentage,
    #[serde(alias = "money")]
    Currency,
}

impl FormatKind {
    pub fn default_pattern(&self) -> &'static str {
        match self {
            FormatKind::Number => "#,##0.00",
            FormatKind::Date => "yyyy-mm-dd",
            FormatKind::Percentage => "0.00%",
            FormatKind::Currency => "¥#,##0.00",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnFormat {
    pub format_type: FormatKind,
    pub pattern: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    #[default]
    All,
    Border,
    Header,
    Fill,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderStyle {
    #[default]
    Thin,
    Medium,
    Thick,
}

/// Borders, fills and header emphasis over an optional A1 range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StyleDirective {
    #[serde(default)]
    pub style_type: StyleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default = "default_header_row")]
    pub header_row: u32,
    #[serde(default)]
    pub border_style: BorderStyle,
    #[serde(default = "default_fill_color")]
    pub fill_color: String,
    #[serde(default = "default_true")]
    pub bold_header: bool,
    #[serde(default)]
    pub all_rows: bool,
}

fn default_header_row() -> u32 {
    1
}

fn default_fill_color() -> String {
    "D9E1F2".into()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Column,
    Line,
    Pie,
    Scatter,
    Area,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPlacement {
    #[default]
    Existing,
    #[serde(alias = "new")]
    NewSheet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Everything an external renderer needs to draw one chart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartDirective {
    pub kind: ChartKind,
    pub title: String,
    pub source_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    pub placement: ChartPlacement,
    pub width: f64,
    pub height: f64,
    pub show_values: bool,
    pub category_label: Option<String>,
    pub categories: Vec<String>,
    pub series: Vec<ChartSeries>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_formats: BTreeMap<String, ColumnFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<StyleDirective>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartDirective>,
}

impl Presentation {
    pub fn is_empty(&self) -> bool {
        self.column_formats.is_empty() && self.styles.is_empty() && self.charts.is_empty()
    }

    pub fn drop_column(&mut self, name: &str) {
        self.column_formats.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_defaults_match_workbook_conventions() {
        let style: StyleDirective = serde_json::from_str(r#"{"style_type": "header"}"#).unwrap();
        assert_eq!(style.fill_color, "D9E1F2");
        assert_eq!(style.header_row, 1);
        assert_eq!(style.border_style, BorderStyle::Thin);
        assert!(style.bold_header);
    }

    #[test]
    fn empty_presentation_serializes_to_empty_object() {
        let json = serde_json::to_string(&Presentation::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
