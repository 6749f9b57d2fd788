//! Two-table operations. The secondary table is a snapshot taken before the
//! operation runs, so a table may be merged with itself.

use std::collections::HashMap;

use xlpilot_plan::{
    disambiguate, LookupJoinParams, MergeHorizontalParams, MergeVerticalParams, MultiMatch,
};
use xlpilot_table::{Table, Value};

use super::{col, cols};
use crate::OpError;

/// Secondary rows by trimmed key text. Null keys never match.
fn index_rows(table: &Table, key: usize) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, cell) in table.column(key).enumerate() {
        if !cell.is_null() {
            index.entry(cell.key_text()).or_default().push(i);
        }
    }
    index
}

fn pick(matches: &[usize], policy: MultiMatch, key: &str) -> Result<Option<usize>, OpError> {
    match (matches, policy) {
        ([], _) => Ok(None),
        ([only], _) => Ok(Some(*only)),
        (_, MultiMatch::First) => Ok(matches.first().copied()),
        (_, MultiMatch::Last) => Ok(matches.last().copied()),
        (_, MultiMatch::Error) => Err(OpError::Validation(format!(
            "key `{key}` matches {} rows of the secondary table",
            matches.len()
        ))),
    }
}

/// Left join: for every primary row, the picked secondary row's `take` cells or nulls.
fn left_join(
    primary: &Table,
    key: usize,
    secondary: &Table,
    secondary_key: usize,
    take: &[usize],
    policy: MultiMatch,
) -> Result<(Vec<Vec<Value>>, usize), OpError> {
    let index = index_rows(secondary, secondary_key);
    let mut columns = vec![Vec::with_capacity(primary.row_count()); take.len()];
    let mut matched = 0usize;
    for cell in primary.column(key) {
        let hit = if cell.is_null() {
            None
        } else {
            let k = cell.key_text();
            pick(index.get(&k).map(Vec::as_slice).unwrap_or(&[]), policy, &k)?
        };
        if hit.is_some() {
            matched += 1;
        }
        for (out, idx) in columns.iter_mut().zip(take) {
            out.push(
                hit.and_then(|r| secondary.rows[r].get(*idx))
                    .cloned()
                    .unwrap_or(Value::Null),
            );
        }
    }
    Ok((columns, matched))
}

pub(crate) fn lookup_join(
    table: &mut Table,
    source: &Table,
    params: &LookupJoinParams,
) -> Result<String, OpError> {
    let key = col(table, &params.key_column)?;
    let source_key = col(
        source,
        params.source_key_column.as_deref().unwrap_or(&params.key_column),
    )?;
    let take = cols(source, params.return_columns.iter())?;

    let (values, matched) = left_join(table, key, source, source_key, &take, params.on_multiple)?;
    let mut added = Vec::with_capacity(take.len());
    for (i, column) in values.into_iter().enumerate() {
        let wanted = params.new_names.0.get(i).unwrap_or(&params.return_columns.0[i]);
        let name = disambiguate(wanted, &table.columns);
        table.push_column(name.clone(), column);
        added.push(name);
    }
    Ok(format!(
        "looked up {} for {matched} of {} rows",
        added.join(", "),
        table.row_count()
    ))
}

/// Colliding non-key names from the secondary table become `name_N`.
pub(crate) fn merge_horizontal(
    table: &mut Table,
    source: &Table,
    params: &MergeHorizontalParams,
) -> Result<String, OpError> {
    let key = col(table, &params.key_column)?;
    let source_key = col(
        source,
        params.source_key_column.as_deref().unwrap_or(&params.key_column),
    )?;
    let take: Vec<usize> = if params.columns_to_add.is_empty() {
        (0..source.width()).filter(|i| *i != source_key).collect()
    } else {
        cols(source, params.columns_to_add.iter())?
    };

    let (values, matched) = left_join(table, key, source, source_key, &take, params.on_multiple)?;
    let mut renamed = 0usize;
    for (column, idx) in values.into_iter().zip(&take) {
        let wanted = &source.columns[*idx];
        let name = disambiguate(wanted, &table.columns);
        if &name != wanted {
            renamed += 1;
        }
        table.push_column(name, column);
    }
    Ok(format!(
        "merged {} columns from `{}` ({matched} of {} rows matched, {renamed} renamed)",
        take.len(),
        source.name,
        table.row_count()
    ))
}

/// A row that repeats the secondary table's own header.
fn is_header_row(row: &[Value], columns: &[String]) -> bool {
    let mut named = 0usize;
    for (cell, name) in row.iter().zip(columns) {
        if cell.is_null() {
            continue;
        }
        if cell.key_text() != name.trim() {
            return false;
        }
        named += 1;
    }
    named > 0
}

/// Row union. Columns follow this table's order, then new ones from `source`.
pub(crate) fn merge_vertical(
    table: &mut Table,
    source: &Table,
    params: &MergeVerticalParams,
) -> Result<String, OpError> {
    for name in &source.columns {
        if table.column_index(name).is_none() {
            table.push_column(name.clone(), Vec::new());
        }
    }
    let mapping: Vec<usize> = source
        .columns
        .iter()
        .map(|name| col(table, name))
        .collect::<Result<_, _>>()?;

    let mut appended = 0usize;
    let mut skipped = 0usize;
    for row in &source.rows {
        if params.skip_header_rows && is_header_row(row, &source.columns) {
            skipped += 1;
            continue;
        }
        let mut out = vec![Value::Null; table.width()];
        for (cell, at) in row.iter().zip(&mapping) {
            out[*at] = cell.clone();
        }
        table.rows.push(out);
        appended += 1;
    }
    Ok(format!(
        "appended {appended} rows from `{}` (skipped {skipped} header rows)",
        source.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> T {
        serde_json::from_value(v).unwrap()
    }

    fn orders() -> Table {
        Table::from_rows(
            "orders",
            ["sku", "qty"],
            vec![
                vec!["A1".into(), 2.0.into()],
                vec!["B2".into(), 1.0.into()],
                vec!["Z9".into(), 4.0.into()],
                vec![Value::Null, 1.0.into()],
            ],
        )
    }

    fn prices() -> Table {
        Table::from_rows(
            "prices",
            ["code", "price", "qty"],
            vec![
                vec!["A1".into(), 9.5.into(), 100.0.into()],
                vec!["B2".into(), 3.0.into(), 50.0.into()],
                vec!["A1".into(), 9.9.into(), 10.0.into()],
            ],
        )
    }

    #[test]
    fn lookup_preserves_rows_and_fills_nulls() {
        let mut t = orders();
        lookup_join(
            &mut t,
            &prices(),
            &params(json!({
                "key_column": "sku", "source_key_column": "code", "return_columns": "price"
            })),
        )
        .unwrap();
        let price: Vec<_> = t.column(2).cloned().collect();
        assert_eq!(price, vec![9.5.into(), 3.0.into(), Value::Null, Value::Null]);
    }

    #[test]
    fn lookup_multiple_match_policies() {
        let mut t = orders();
        lookup_join(
            &mut t,
            &prices(),
            &params(json!({
                "key_column": "sku",
                "source_key_column": "code",
                "return_columns": "price",
                "on_multiple": "last"
            })),
        )
        .unwrap();
        assert_eq!(t.rows[0][2], Value::Number(9.9));

        let mut t = orders();
        let err = lookup_join(
            &mut t,
            &prices(),
            &params(json!({
                "key_column": "sku",
                "source_key_column": "code",
                "return_columns": "price",
                "on_multiple": "error"
            })),
        )
        .unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
    }

    #[test]
    fn merge_horizontal_suffixes_collisions() {
        let mut t = orders();
        let p = params(json!({"key_column": "sku", "source_key_column": "code"}));
        merge_horizontal(&mut t, &prices(), &p).unwrap();
        assert_eq!(t.columns, vec!["sku", "qty", "price", "qty_1"]);
        assert_eq!(t.row_count(), 4);
        assert_eq!(t.rows[1][3], Value::Number(50.0));
    }

    #[test]
    fn merge_vertical_unions_columns_and_skips_headers() {
        let mut t = orders();
        let other = Table::from_rows(
            "more",
            ["qty", "note"],
            vec![
                vec!["qty".into(), "note".into()],
                vec![3.0.into(), "late".into()],
            ],
        );
        merge_vertical(&mut t, &other, &params(json!({}))).unwrap();
        assert_eq!(t.columns, vec!["sku", "qty", "note"]);
        assert_eq!(t.row_count(), 5);
        assert_eq!(t.rows[4], vec![Value::Null, 3.0.into(), "late".into()]);
        assert_eq!(t.rows[0][2], Value::Null);
    }
}
