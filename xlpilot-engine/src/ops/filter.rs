use chrono::NaiveDate;
use xlpilot_plan::{CompareOp, Comparison, Condition};
use xlpilot_table::{parse_date, Table, Value};
use xlpilot_types::DataType;

use super::col;
use crate::OpError;

/// Literal of a comparison, typed against the column it is compared with.
#[derive(Debug)]
enum Literal {
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
    Text(String),
    None,
}

#[derive(Debug)]
enum Pred {
    All(Vec<Pred>),
    Any(Vec<Pred>),
    Not(Box<Pred>),
    Cmp {
        idx: usize,
        op: CompareOp,
        lit: Literal,
        /// Lowercased text of the literal, for substring operators.
        needle: String,
    },
}

fn literal_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "是" | "真" => Some(true),
        "false" | "no" | "n" | "0" | "否" | "假" => Some(false),
        _ => None,
    }
}

fn compile_cmp(table: &Table, c: &Comparison) -> Result<Pred, OpError> {
    let idx = col(table, &c.column)?;
    let ty = table.column_type(idx);
    let raw = c.value.as_ref().filter(|v| !v.is_null());
    let text = raw.map(literal_text).unwrap_or_default();

    let mismatch = |what: &str| {
        OpError::Validation(format!(
            "cannot compare column `{}` ({}) with {what} `{text}` using {:?}",
            c.column,
            ty.map(|t| t.as_str()).unwrap_or("empty"),
            c.operator
        ))
    };

    let lit = match (c.operator.needs_value(), raw) {
        (false, _) | (true, None) => Literal::None,
        (true, Some(v)) => match ty {
            Some(DataType::Number) => {
                let n = match v {
                    serde_json::Value::Number(n) => n.as_f64(),
                    _ => Value::Text(text.clone()).as_f64(),
                };
                match n {
                    Some(n) => Literal::Number(n),
                    None if c.operator.is_ordering() => return Err(mismatch("non-numeric value")),
                    None => Literal::Text(text.clone()),
                }
            }
            Some(DataType::Date) => match parse_date(&text) {
                Some(d) => Literal::Date(d),
                None if c.operator.is_ordering() => return Err(mismatch("non-date value")),
                None => Literal::Text(text.clone()),
            },
            Some(DataType::Boolean) => {
                if c.operator.is_ordering() {
                    return Err(mismatch("value"));
                }
                match v {
                    serde_json::Value::Bool(b) => Literal::Bool(*b),
                    _ => parse_bool(&text)
                        .map(Literal::Bool)
                        .unwrap_or(Literal::Text(text.clone())),
                }
            }
            Some(DataType::Text) => {
                if c.operator.is_ordering() {
                    return Err(mismatch("ordering"));
                }
                Literal::Text(text.clone())
            }
            None => Literal::Text(text.clone()),
        },
    };

    Ok(Pred::Cmp {
        idx,
        op: c.operator,
        lit,
        needle: text.to_lowercase(),
    })
}

fn compile(table: &Table, cond: &Condition) -> Result<Pred, OpError> {
    Ok(match cond {
        Condition::All { all } => Pred::All(
            all.iter()
                .map(|c| compile(table, c))
                .collect::<Result<_, _>>()?,
        ),
        Condition::Any { any } => Pred::Any(
            any.iter()
                .map(|c| compile(table, c))
                .collect::<Result<_, _>>()?,
        ),
        Condition::Not { not } => Pred::Not(Box::new(compile(table, not)?)),
        Condition::Compare(c) => compile_cmp(table, c)?,
    })
}

fn equals(cell: &Value, lit: &Literal) -> bool {
    match lit {
        Literal::Number(n) => cell.as_f64().map_or(false, |v| v == *n),
        Literal::Date(d) => cell.as_date().map_or(false, |v| v == *d),
        Literal::Bool(b) => match cell {
            Value::Bool(v) => v == b,
            other => parse_bool(&other.key_text()) == Some(*b),
        },
        Literal::Text(t) => cell.key_text() == t.trim(),
        Literal::None => false,
    }
}

fn ordering(cell: &Value, lit: &Literal) -> Option<std::cmp::Ordering> {
    match lit {
        Literal::Number(n) => cell.as_f64().and_then(|v| v.partial_cmp(n)),
        Literal::Date(d) => cell.as_date().map(|v| v.cmp(d)),
        _ => None,
    }
}

impl Pred {
    fn eval(&self, row: &[Value]) -> bool {
        match self {
            Pred::All(list) => list.iter().all(|p| p.eval(row)),
            Pred::Any(list) => list.iter().any(|p| p.eval(row)),
            Pred::Not(p) => !p.eval(row),
            Pred::Cmp {
                idx,
                op,
                lit,
                needle,
            } => {
                let cell = row.get(*idx).unwrap_or(&Value::Null);
                // Null cells match only null tests and negations.
                if cell.is_null() {
                    return matches!(op, CompareOp::Empty | CompareOp::Ne | CompareOp::NotContains);
                }
                let hay = || cell.key_text().to_lowercase();
                match op {
                    CompareOp::Eq => equals(cell, lit),
                    CompareOp::Ne => !equals(cell, lit),
                    CompareOp::Gt => ordering(cell, lit).map_or(false, |o| o.is_gt()),
                    CompareOp::Lt => ordering(cell, lit).map_or(false, |o| o.is_lt()),
                    CompareOp::Gte => ordering(cell, lit).map_or(false, |o| o.is_ge()),
                    CompareOp::Lte => ordering(cell, lit).map_or(false, |o| o.is_le()),
                    CompareOp::Contains => hay().contains(needle.as_str()),
                    CompareOp::NotContains => !hay().contains(needle.as_str()),
                    CompareOp::StartsWith => hay().starts_with(needle.as_str()),
                    CompareOp::EndsWith => hay().ends_with(needle.as_str()),
                    CompareOp::Empty => false,
                    CompareOp::NotEmpty => true,
                }
            }
        }
    }
}

fn retain(table: &mut Table, cond: &Condition, keep_matches: bool) -> Result<usize, OpError> {
    let pred = compile(table, cond)?;
    let before = table.row_count();
    table.rows.retain(|row| pred.eval(row) == keep_matches);
    Ok(before - table.row_count())
}

pub(crate) fn filter(table: &mut Table, cond: &Condition) -> Result<String, OpError> {
    let dropped = retain(table, cond, true)?;
    Ok(format!("kept {} rows, dropped {dropped}", table.row_count()))
}

pub(crate) fn delete_rows(table: &mut Table, cond: &Condition) -> Result<String, OpError> {
    let deleted = retain(table, cond, false)?;
    Ok(format!("deleted {deleted} rows"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        Table::from_rows(
            "t",
            ["name", "amt", "day", "active"],
            vec![
                vec!["Apple".into(), 10.0.into(), Value::parse_literal("2024-01-05"), true.into()],
                vec![
                    "banana".into(),
                    25.0.into(),
                    Value::parse_literal("2024-02-01"),
                    false.into(),
                ],
                vec![Value::Null, Value::Null, Value::Null, Value::Null],
            ],
        )
    }

    fn cond(v: serde_json::Value) -> Condition {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn numeric_and_date_comparisons() {
        let mut t = table();
        filter(&mut t, &cond(json!({"column": "amt", "operator": ">", "value": "12"}))).unwrap();
        assert_eq!(t.row_count(), 1);

        let mut t = table();
        let c = cond(json!({"column": "day", "operator": "lt", "value": "2024/01/31"}));
        filter(&mut t, &c).unwrap();
        assert_eq!(t.rows[0][0], Value::from("Apple"));
        assert_eq!(t.row_count(), 1);
    }

    #[test]
    fn ordering_on_text_is_rejected() {
        let mut t = table();
        let c = cond(json!({"column": "name", "operator": "gt", "value": 3}));
        let err = filter(&mut t, &c).unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
        assert_eq!(t.row_count(), 3);
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let mut t = table();
        let err = filter(&mut t, &cond(json!({"column": "ghost", "value": 1}))).unwrap_err();
        assert!(matches!(err, OpError::SchemaMismatch(_)));
    }

    #[test]
    fn nulls_only_match_null_tests() {
        let mut t = table();
        filter(&mut t, &cond(json!({"column": "amt", "operator": "empty"}))).unwrap();
        assert_eq!(t.row_count(), 1);

        let mut t = table();
        let c = cond(json!({"column": "name", "operator": "ne", "value": "Apple"}));
        filter(&mut t, &c).unwrap();
        assert_eq!(t.row_count(), 2);
    }

    #[test]
    fn null_cells_match_negations_in_an_all_null_column() {
        let rows = || {
            Table::from_rows(
                "t",
                ["name", "note"],
                vec![vec!["A".into(), Value::Null], vec!["B".into(), Value::Null]],
            )
        };
        for op in ["ne", "not_contains"] {
            let mut t = rows();
            filter(&mut t, &cond(json!({"column": "note", "operator": op, "value": "x"}))).unwrap();
            assert_eq!(t.row_count(), 2, "{op}");
        }
        let mut t = rows();
        filter(&mut t, &cond(json!({"column": "note", "operator": "eq", "value": "x"}))).unwrap();
        assert_eq!(t.row_count(), 0);
    }

    #[test]
    fn groups_and_substrings() {
        let mut t = table();
        filter(
            &mut t,
            &cond(json!({"any": [
                {"column": "name", "operator": "contains", "value": "APP"},
                {"column": "active", "operator": "eq", "value": "no"}
            ]})),
        )
        .unwrap();
        assert_eq!(t.row_count(), 2);
    }

    #[test]
    fn delete_rows_removes_matches() {
        let mut t = table();
        let c = cond(json!({"column": "name", "operator": "startswith", "value": "b"}));
        let detail = delete_rows(&mut t, &c).unwrap();
        assert_eq!(detail, "deleted 1 rows");
        assert_eq!(t.row_count(), 2);
    }
}
