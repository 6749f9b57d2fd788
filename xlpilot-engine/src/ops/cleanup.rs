use std::collections::HashSet;

use regex::Regex;
use xlpilot_plan::{
    DeduplicateParams, FillMethod, FillParams, KeepPolicy, ReplaceMode, ReplaceParams,
};
use xlpilot_table::{Table, Value};

use super::cols;
use crate::OpError;

/// Null cells get a marker no real text can collide with.
fn key_of(row: &[Value], idxs: &[usize]) -> Vec<Option<String>> {
    idxs.iter()
        .map(|i| row.get(*i).filter(|v| !v.is_null()).map(Value::key_text))
        .collect()
}

pub(crate) fn deduplicate(
    table: &mut Table,
    params: &DeduplicateParams,
) -> Result<String, OpError> {
    let idxs: Vec<usize> = if params.columns.is_empty() {
        (0..table.width()).collect()
    } else {
        cols(table, params.columns.iter())?
    };

    let n = table.row_count();
    let mut keep = vec![false; n];
    let mut seen = HashSet::with_capacity(n);
    let order: Box<dyn Iterator<Item = usize>> = match params.keep {
        KeepPolicy::First => Box::new(0..n),
        KeepPolicy::Last => Box::new((0..n).rev()),
    };
    for i in order {
        if seen.insert(key_of(&table.rows[i], &idxs)) {
            keep[i] = true;
        }
    }

    let mut flags = keep.into_iter();
    table.rows.retain(|_| flags.next().unwrap_or(false));
    Ok(format!("removed {} duplicate rows", n - table.row_count()))
}

enum Matcher {
    Exact(String),
    Substring(String),
    Pattern(Regex),
}

pub(crate) fn replace(table: &mut Table, params: &ReplaceParams) -> Result<String, OpError> {
    let idxs = cols(table, params.columns.iter())?;
    let matcher = match params.mode {
        ReplaceMode::Exact => Matcher::Exact(params.old_value.trim().to_string()),
        ReplaceMode::Substring => Matcher::Substring(params.old_value.clone()),
        ReplaceMode::Regex => Matcher::Pattern(Regex::new(&params.old_value).map_err(|e| {
            OpError::Validation(format!("invalid pattern `{}`: {e}", params.old_value))
        })?),
    };

    let mut changed = 0usize;
    for row in &mut table.rows {
        for idx in &idxs {
            let Some(cell) = row.get_mut(*idx) else {
                continue;
            };
            let text = cell.to_string();
            let replaced = match &matcher {
                Matcher::Exact(old) => (cell.key_text() == *old).then(|| params.new_value.clone()),
                Matcher::Substring(old) => text
                    .contains(old.as_str())
                    .then(|| text.replace(old.as_str(), &params.new_value)),
                Matcher::Pattern(re) => re
                    .is_match(&text)
                    .then(|| re.replace_all(&text, params.new_value.as_str()).into_owned()),
            };
            let Some(new_text) = replaced else { continue };
            *cell = match &*cell {
                Value::Text(_) if !new_text.trim().is_empty() => Value::Text(new_text),
                _ => Value::parse_literal(&new_text),
            };
            changed += 1;
        }
    }
    Ok(format!("replaced {changed} cells"))
}

pub(crate) fn fill(table: &mut Table, params: &FillParams) -> Result<String, OpError> {
    let idxs = cols(table, params.columns.iter())?;
    let constant = match &params.value {
        Some(serde_json::Value::String(s)) => Value::parse_literal(s),
        Some(v) => Value::from_json(v),
        None => Value::Null,
    };

    let mut filled = 0usize;
    let n = table.row_count();
    for idx in idxs {
        match params.method {
            FillMethod::Constant => {
                for row in &mut table.rows {
                    if row[idx].is_null() && !constant.is_null() {
                        row[idx] = constant.clone();
                        filled += 1;
                    }
                }
            }
            FillMethod::Forward | FillMethod::Backward => {
                let order: Box<dyn Iterator<Item = usize>> =
                    if params.method == FillMethod::Forward {
                        Box::new(0..n)
                    } else {
                        Box::new((0..n).rev())
                    };
                let mut carry: Option<Value> = None;
                for i in order {
                    let cell = &mut table.rows[i][idx];
                    if cell.is_null() {
                        if let Some(v) = &carry {
                            *cell = v.clone();
                            filled += 1;
                        }
                    } else {
                        carry = Some(cell.clone());
                    }
                }
            }
        }
    }
    Ok(format!("filled {filled} cells ({:?})", params.method).to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> T {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn dedupe_keeps_first_or_last() {
        let rows = vec![
            vec!["a".into(), 1.0.into()],
            vec!["b".into(), 2.0.into()],
            vec![" a".into(), 3.0.into()],
            vec![Value::Null, 4.0.into()],
            vec!["".into(), 5.0.into()],
        ];
        let mut t = Table::from_rows("t", ["k", "v"], rows.clone());
        deduplicate(&mut t, &params(json!({"columns": "k"}))).unwrap();
        let v: Vec<_> = t.column(1).cloned().collect();
        assert_eq!(v, vec![1.0.into(), 2.0.into(), 4.0.into()]);

        let mut t = Table::from_rows("t", ["k", "v"], rows);
        deduplicate(&mut t, &params(json!({"subset": ["k"], "keep": "last"}))).unwrap();
        let v: Vec<_> = t.column(1).cloned().collect();
        assert_eq!(v, vec![2.0.into(), 3.0.into(), 5.0.into()]);
    }

    #[test]
    fn replace_modes() {
        let mut t = Table::from_rows(
            "t",
            ["phone", "status"],
            vec![
                vec!["(555) 010-2000".into(), "N/A".into()],
                vec!["555.010.3000".into(), "ok".into()],
            ],
        );
        let p = params(json!({
            "column": "phone", "old_value": "\\D", "new_value": "", "regex": true
        }));
        replace(&mut t, &p).unwrap();
        assert_eq!(t.rows[0][0], Value::from("5550102000"));

        let p = params(json!({
            "column": "status", "old_value": "N/A", "new_value": "", "mode": "exact"
        }));
        replace(&mut t, &p).unwrap();
        assert_eq!(t.rows[0][1], Value::Null);
        assert_eq!(t.rows[1][1], Value::from("ok"));
    }

    #[test]
    fn forward_fill_carries_previous_value() {
        let mut t = Table::from_rows("t", ["amt"], vec![vec![100.0.into()], vec![Value::Null]]);
        fill(&mut t, &params(json!({"column": "amt", "method": "forward"}))).unwrap();
        assert_eq!(t.rows[1][0], Value::Number(100.0));
    }

    #[test]
    fn backward_and_constant_fill() {
        let rows = vec![vec![Value::Null], vec!["".into()], vec![7.0.into()], vec![Value::Null]];
        let mut t = Table::from_rows("t", ["x"], rows.clone());
        fill(&mut t, &params(json!({"column": "x", "method": "bfill"}))).unwrap();
        let x: Vec<_> = t.column(0).cloned().collect();
        assert_eq!(x, vec![7.0.into(), 7.0.into(), 7.0.into(), Value::Null]);

        let mut t = Table::from_rows("t", ["x"], rows);
        let detail = fill(&mut t, &params(json!({"column": "x", "value": "0"}))).unwrap();
        assert_eq!(detail, "filled 3 cells (constant)");
        assert!(t.column(0).all(|v| !v.is_null()));
    }
}
