use std::collections::HashMap;

use xlpilot_plan::{disambiguate, AggFunc, CalculateParams, PivotParams};
use xlpilot_table::{Table, Value};

use super::{col, cols};
use crate::OpError;

const DEFAULT_LABEL: &str = "Total";

#[derive(Default)]
struct Accum {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accum {
    fn push(&mut self, n: f64) {
        self.count += 1;
        self.sum += n;
        self.min = Some(self.min.map_or(n, |m| m.min(n)));
        self.max = Some(self.max.map_or(n, |m| m.max(n)));
    }

    fn finish(&self, func: AggFunc) -> Value {
        let n = match func {
            AggFunc::Count => Some(self.count as f64),
            AggFunc::Sum => Some(self.sum),
            AggFunc::Avg => (self.count > 0).then(|| self.sum / self.count as f64),
            AggFunc::Min => self.min,
            AggFunc::Max => self.max,
        };
        n.map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Numeric view of a non-null cell, or a schema error naming the column.
fn measure(cell: &Value, column: &str, func: AggFunc) -> Result<Option<f64>, OpError> {
    if cell.is_null() {
        return Ok(None);
    }
    if func == AggFunc::Count {
        return Ok(Some(0.0));
    }
    cell.as_f64().map(Some).ok_or_else(|| {
        OpError::SchemaMismatch(format!(
            "{func:?} needs numbers but `{column}` holds `{cell}`"
        ))
    })
}

pub(crate) fn calculate(table: &mut Table, params: &CalculateParams) -> Result<String, OpError> {
    let mut summary = vec![Value::Null; table.width()];
    let mut aggregated = vec![false; table.width()];

    for agg in &params.operations {
        let idx = col(table, &agg.column)?;
        let mut acc = Accum::default();
        for cell in table.column(idx) {
            if let Some(n) = measure(cell, &agg.column, agg.function)? {
                acc.push(n);
            }
        }
        summary[idx] = acc.finish(agg.function);
        aggregated[idx] = true;
    }

    if let Some(free) = aggregated.iter().position(|a| !a) {
        let label = params
            .label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());
        summary[free] = Value::Text(label);
    }
    table.rows.push(summary);
    Ok(format!("appended summary row over {} columns", params.operations.len()))
}

/// Cross-tabulates `table` into a new table named `output_id`.
pub(crate) fn pivot(
    table: &Table,
    params: &PivotParams,
    output_id: &str,
) -> Result<Table, OpError> {
    let index = cols(table, params.index.iter())?;
    let axis = params.columns.0.first().map(|c| col(table, c)).transpose()?;
    let value_name = params
        .values
        .0
        .first()
        .ok_or_else(|| OpError::Validation("pivot needs a values column".into()))?;
    let value = col(table, value_name)?;

    let mut group_ids: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Value>> = Vec::new();
    let mut axis_ids: HashMap<String, usize> = HashMap::new();
    let mut axis_names: Vec<String> = Vec::new();
    let mut cells: HashMap<(usize, usize), Accum> = HashMap::new();

    for row in &table.rows {
        let get = |i: usize| row.get(i).unwrap_or(&Value::Null);
        if index.iter().any(|i| get(*i).is_null()) {
            continue;
        }
        let a = match axis {
            Some(i) if get(i).is_null() => continue,
            Some(i) => {
                let key = get(i).key_text();
                let next = axis_names.len();
                *axis_ids.entry(key.clone()).or_insert_with(|| {
                    axis_names.push(key);
                    next
                })
            }
            None => 0,
        };
        let key: Vec<String> = index.iter().map(|i| get(*i).key_text()).collect();
        let next = groups.len();
        let g = *group_ids.entry(key).or_insert_with(|| {
            groups.push(index.iter().map(|i| get(*i).clone()).collect());
            next
        });
        let acc = cells.entry((g, a)).or_default();
        if let Some(n) = measure(get(value), value_name, params.aggfunc)? {
            acc.push(n);
        }
    }

    let mut columns: Vec<String> = params.index.0.clone();
    let measures: Vec<String> = if axis.is_some() {
        axis_names
    } else {
        vec![value_name.clone()]
    };
    for m in &measures {
        let name = disambiguate(m, &columns);
        columns.push(name);
    }

    let mut out = Table::new(output_id, columns);
    out.source = table.source;
    for (g, keys) in groups.into_iter().enumerate() {
        let mut row = keys;
        for a in 0..measures.len() {
            row.push(
                cells
                    .get(&(g, a))
                    .map(|acc| acc.finish(params.aggfunc))
                    .unwrap_or(Value::Null),
            );
        }
        out.push_row(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> Table {
        Table::from_rows(
            "sales",
            ["region", "month", "amt"],
            vec![
                vec!["N".into(), "Jan".into(), 10.0.into()],
                vec!["S".into(), "Feb".into(), 5.0.into()],
                vec!["N".into(), "Feb".into(), 7.0.into()],
                vec!["N".into(), "Jan".into(), 3.0.into()],
                vec![Value::Null, "Jan".into(), 100.0.into()],
            ],
        )
    }

    #[test]
    fn summary_row_is_labeled() {
        let mut t = sales();
        let params: CalculateParams = serde_json::from_value(json!({"operations": [
            {"column": "amt", "function": "sum"}, {"column": "month", "function": "count"}
        ]}))
        .unwrap();
        calculate(&mut t, &params).unwrap();
        let last = t.rows.last().unwrap();
        assert_eq!(last, &vec![Value::from("Total"), 5.0.into(), 125.0.into()]);
    }

    #[test]
    fn calculate_rejects_text_measures() {
        let mut t = sales();
        let params: CalculateParams = serde_json::from_value(json!({
            "operations": [{"column": "month", "function": "avg"}]
        }))
        .unwrap();
        assert!(matches!(calculate(&mut t, &params), Err(OpError::SchemaMismatch(_))));
        assert_eq!(t.row_count(), 5);
    }

    #[test]
    fn pivot_orders_by_first_appearance() {
        let params: PivotParams = serde_json::from_value(json!({
            "index": "region", "columns": "month", "values": "amt"
        }))
        .unwrap();
        let out = pivot(&sales(), &params, "main_pivot").unwrap();
        assert_eq!(out.name, "main_pivot");
        assert_eq!(out.columns, vec!["region", "Jan", "Feb"]);
        assert_eq!(out.rows[0], vec![Value::from("N"), 13.0.into(), 7.0.into()]);
        assert_eq!(out.rows[1], vec![Value::from("S"), Value::Null, 5.0.into()]);
    }

    #[test]
    fn pivot_without_axis_names_measure_after_value() {
        let params: PivotParams = serde_json::from_value(json!({
            "rows": ["region"], "values": "amt", "aggfunc": "max"
        }))
        .unwrap();
        let out = pivot(&sales(), &params, "p").unwrap();
        assert_eq!(out.columns, vec!["region", "amt"]);
        assert_eq!(out.rows[0][1], Value::Number(10.0));
    }
}
