use xlpilot_plan::{
    disambiguate, AddColumnParams, DeleteColumnParams, MergeColumnsParams, SchemaView,
    SplitColumnParams,
};
use xlpilot_table::{Table, Value};

use super::{col, cols};
use crate::OpError;

pub(crate) fn add_column(table: &mut Table, params: &AddColumnParams) -> Result<String, OpError> {
    let expr = &params.expression.0;
    let inputs = expr
        .columns()
        .into_iter()
        .map(|name| Ok((name.to_string(), col(table, name)?)))
        .collect::<Result<Vec<_>, OpError>>()?;

    let values: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let lookup = |name: &str| {
                inputs
                    .iter()
                    .find(|(n, _)| n == name)
                    .and_then(|(_, idx)| row.get(*idx))
                    .and_then(Value::as_f64)
            };
            expr.eval(&lookup).map(Value::Number).unwrap_or(Value::Null)
        })
        .collect();
    let nulls = values.iter().filter(|v| v.is_null()).count();

    match table.column_index(&params.name) {
        Some(idx) => {
            for (row, v) in table.rows.iter_mut().zip(values) {
                row[idx] = v;
            }
            Ok(format!("recomputed `{}` = {expr} ({nulls} null cells)", params.name))
        }
        None => {
            let at = SchemaView::new(table.columns.clone()).insert_index(&params.position);
            table.insert_column(at, params.name.clone(), values);
            Ok(format!("added `{}` = {expr} ({nulls} null cells)", params.name))
        }
    }
}

pub(crate) fn delete_columns(
    table: &mut Table,
    params: &DeleteColumnParams,
) -> Result<String, OpError> {
    let mut idxs = cols(table, params.columns.iter())?;
    idxs.sort_unstable();
    idxs.dedup();
    for idx in idxs.iter().rev() {
        table.remove_column(*idx);
    }
    Ok(format!("deleted {} columns", idxs.len()))
}

pub(crate) fn split_column(
    table: &mut Table,
    params: &SplitColumnParams,
) -> Result<String, OpError> {
    let idx = col(table, &params.column)?;
    let n = params.new_columns.len();

    let mut parts: Vec<Vec<Value>> = vec![Vec::with_capacity(table.row_count()); n];
    for cell in table.column(idx) {
        let text = cell.to_string();
        // Parts beyond the named columns are dropped.
        let mut pieces = if cell.is_null() {
            None
        } else {
            Some(text.split(params.delimiter.as_str()).take(n))
        };
        for out in parts.iter_mut() {
            let piece = pieces.as_mut().and_then(Iterator::next).map(str::trim);
            out.push(match piece {
                Some(p) if !p.is_empty() => Value::Text(p.to_string()),
                _ => Value::Null,
            });
        }
    }

    let mut names = Vec::with_capacity(n);
    for (name, values) in params.new_columns.iter().zip(parts) {
        let name = disambiguate(name, &table.columns);
        table.push_column(name.clone(), values);
        names.push(name);
    }
    if params.drop_original {
        table.remove_column(idx);
    }
    Ok(format!("split `{}` into {}", params.column, names.join(", ")))
}

pub(crate) fn merge_columns(
    table: &mut Table,
    params: &MergeColumnsParams,
) -> Result<String, OpError> {
    let idxs = cols(table, params.columns.iter())?;
    let values: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let pieces: Vec<String> = idxs
                .iter()
                .filter_map(|i| row.get(*i))
                .filter(|v| !v.is_null())
                .map(ToString::to_string)
                .collect();
            if pieces.is_empty() {
                Value::Null
            } else {
                Value::Text(pieces.join(&params.delimiter))
            }
        })
        .collect();

    if !params.keep_original {
        let mut sorted = idxs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        for idx in sorted.iter().rev() {
            table.remove_column(*idx);
        }
    }
    let name = disambiguate(&params.new_name, &table.columns);
    table.push_column(name.clone(), values);
    Ok(format!("merged {} columns into `{name}`", idxs.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> T {
        serde_json::from_value(v).unwrap()
    }

    fn table() -> Table {
        Table::from_rows(
            "t",
            ["qty", "price", "full"],
            vec![
                vec![2.0.into(), 3.5.into(), "Ada Lovelace".into()],
                vec![0.0.into(), Value::Null, "Plato".into()],
                vec!["4".into(), 1.0.into(), Value::Null],
            ],
        )
    }

    #[test]
    fn add_column_nulls_per_row() {
        let mut t = table();
        add_column(
            &mut t,
            &params(json!({"name": "ratio", "formula": "price / qty", "position": "after:qty"})),
        )
        .unwrap();
        assert_eq!(t.columns, vec!["qty", "ratio", "price", "full"]);
        let ratio: Vec<_> = t.column(1).cloned().collect();
        assert_eq!(ratio, vec![1.75.into(), Value::Null, 0.25.into()]);
    }

    #[test]
    fn add_column_unknown_reference() {
        let mut t = table();
        let p = params(json!({"name": "x", "formula": "cost * 2"}));
        let err = add_column(&mut t, &p).unwrap_err();
        assert!(matches!(err, OpError::SchemaMismatch(_)));
    }

    #[test]
    fn add_column_existing_name_is_overwritten() {
        let mut t = table();
        add_column(&mut t, &params(json!({"name": "qty", "formula": "qty + 1"}))).unwrap();
        assert_eq!(t.width(), 3);
        assert_eq!(t.rows[2][0], Value::Number(5.0));
    }

    #[test]
    fn split_pads_with_nulls() {
        let mut t = table();
        split_column(
            &mut t,
            &params(json!({
                "column": "full",
                "delimiter": " ",
                "new_columns": ["first", "last"],
                "drop_original": true
            })),
        )
        .unwrap();
        assert_eq!(t.columns, vec!["qty", "price", "first", "last"]);
        assert_eq!(t.rows[0][3], Value::from("Lovelace"));
        assert_eq!(t.rows[1][3], Value::Null);
        assert_eq!(t.rows[2][2], Value::Null);
    }

    #[test]
    fn split_discards_surplus_parts() {
        let mut t = Table::from_rows("t", ["full"], vec![vec!["a b c".into()]]);
        split_column(
            &mut t,
            &params(json!({"column": "full", "delimiter": " ", "new_columns": ["x", "y"]})),
        )
        .unwrap();
        assert_eq!(t.columns, vec!["full", "x", "y"]);
        assert_eq!(t.rows[0][1], Value::from("a"));
        assert_eq!(t.rows[0][2], Value::from("b"));
    }

    #[test]
    fn merge_drops_originals_and_skips_nulls() {
        let mut t = table();
        merge_columns(
            &mut t,
            &params(json!({
                "columns": ["qty", "price"],
                "new_name": "qty",
                "delimiter": "x",
                "keep_original": false
            })),
        )
        .unwrap();
        assert_eq!(t.columns, vec!["full", "qty"]);
        assert_eq!(t.rows[0][1], Value::from("2x3.5"));
        assert_eq!(t.rows[1][1], Value::from("0"));
    }

    #[test]
    fn delete_checks_every_name_first() {
        let mut t = table();
        let err = delete_columns(&mut t, &params(json!({"columns": ["qty", "nope"]}))).unwrap_err();
        assert!(matches!(err, OpError::SchemaMismatch(_)));
        assert_eq!(t.width(), 3);
        delete_columns(&mut t, &params(json!({"columns": ["full", "qty"]}))).unwrap();
        assert_eq!(t.columns, vec!["price"]);
    }
}
