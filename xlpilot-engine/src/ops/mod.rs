//! One module per family of operations. Every handler edits the staged table
//! in place and returns a one-line description for the execution log.

pub(crate) mod aggregate;
pub(crate) mod cleanup;
pub(crate) mod columns;
pub(crate) mod filter;
pub(crate) mod join;
pub(crate) mod present;
pub(crate) mod sort;

use xlpilot_table::Table;

use crate::OpError;

/// Position of `name` in the current column list.
pub(crate) fn col(table: &Table, name: &str) -> Result<usize, OpError> {
    table.column_index(name).ok_or_else(|| {
        OpError::SchemaMismatch(format!(
            "column `{name}` does not exist in `{}` (columns: {})",
            table.name,
            table.columns.join(", ")
        ))
    })
}

pub(crate) fn cols<'a>(
    table: &Table,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<usize>, OpError> {
    names.into_iter().map(|n| col(table, n)).collect()
}
