//! Presentation-only operations. Cell values are never touched here.

use xlpilot_plan::FormatParams;
use xlpilot_table::{ColumnFormat, StyleDirective, Table};

use super::cols;
use crate::OpError;

pub(crate) fn format(table: &mut Table, params: &FormatParams) -> Result<String, OpError> {
    cols(table, params.columns.iter())?;
    let pattern = params
        .format_string
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| params.format_type.default_pattern().to_string());
    for c in params.columns.iter() {
        table.presentation.column_formats.insert(
            c.clone(),
            ColumnFormat {
                format_type: params.format_type,
                pattern: pattern.clone(),
            },
        );
    }
    Ok(format!("formatted {} columns as `{pattern}`", params.columns.len()))
}

pub(crate) fn style(table: &mut Table, directive: &StyleDirective) -> Result<String, OpError> {
    table.presentation.styles.push(directive.clone());
    Ok(format!(
        "styled {}",
        directive.range.as_deref().unwrap_or("the whole sheet")
    ))
}
