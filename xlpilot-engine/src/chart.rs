//! Chart directives. Charts are described here and drawn by whoever writes
//! the workbook.

use xlpilot_plan::ChartParams;
use xlpilot_table::{ChartDirective, ChartKind, ChartSeries, Table};
use xlpilot_types::DataType;

use crate::ops::col;
use crate::OpError;

fn numeric_series(table: &Table, name: &str) -> Result<ChartSeries, OpError> {
    let idx = col(table, name)?;
    match table.column_type(idx) {
        Some(DataType::Number) => Ok(ChartSeries {
            name: name.to_string(),
            values: table.column(idx).map(|v| v.number()).collect(),
        }),
        other => Err(OpError::SchemaMismatch(format!(
            "chart measure `{name}` must be numeric, found {}",
            other.map(|t| t.as_str()).unwrap_or("no values")
        ))),
    }
}

pub(crate) fn resolve(table: &Table, params: &ChartParams) -> Result<ChartDirective, OpError> {
    if table.row_count() == 0 {
        return Err(OpError::Validation(format!("cannot chart `{}`: it has no rows", table.name)));
    }

    let mut series = params
        .data_columns
        .iter()
        .map(|c| numeric_series(table, c))
        .collect::<Result<Vec<_>, _>>()?;
    if series.is_empty() || (params.chart_type == ChartKind::Scatter && series.len() < 2) {
        return Err(OpError::Validation(format!(
            "{:?} chart needs more data columns",
            params.chart_type
        )));
    }

    let (category_label, categories) = match (params.chart_type, &params.label_column) {
        (ChartKind::Scatter, _) => {
            // x values come from the first measure
            let x = series.remove(0);
            let cats = x
                .values
                .iter()
                .map(|v| v.map(|n| n.to_string()).unwrap_or_default())
                .collect();
            (Some(x.name), cats)
        }
        (_, Some(label)) => {
            let idx = col(table, label)?;
            (Some(label.clone()), table.column(idx).map(|v| v.key_text()).collect())
        }
        (_, None) => (None, (1..=table.row_count()).map(|i| i.to_string()).collect()),
    };
    if params.chart_type == ChartKind::Pie {
        series.truncate(1);
    }

    let title = params
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| params.data_columns.0.join(", "));

    Ok(ChartDirective {
        kind: params.chart_type,
        title,
        source_table: table.name.clone(),
        sheet_name: params.sheet_name.clone(),
        placement: params.position,
        width: params.width,
        height: params.height,
        show_values: params.show_values,
        category_label,
        categories,
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xlpilot_table::Value;

    fn table() -> Table {
        Table::from_rows(
            "sales",
            ["region", "q1", "q2"],
            vec![
                vec!["N".into(), 10.0.into(), 12.0.into()],
                vec!["S".into(), Value::Null, 8.0.into()],
            ],
        )
    }

    fn params(v: serde_json::Value) -> ChartParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn bar_chart_uses_label_column() {
        let d = resolve(
            &table(),
            &params(json!({
                "chart_type": "bar", "data_columns": ["q1", "q2"], "label_column": "region"
            })),
        )
        .unwrap();
        assert_eq!(d.categories, vec!["N", "S"]);
        assert_eq!(d.series[0].values, vec![Some(10.0), None]);
        assert_eq!(d.title, "q1, q2");
        assert_eq!(d.source_table, "sales");
    }

    #[test]
    fn text_measure_is_rejected() {
        let p = params(json!({"chart_type": "line", "data_columns": "region"}));
        let err = resolve(&table(), &p).unwrap_err();
        assert!(matches!(err, OpError::SchemaMismatch(_)));
    }

    #[test]
    fn pie_keeps_one_series_and_scatter_uses_first_as_x() {
        let p = params(json!({"chart_type": "pie", "data_columns": ["q1", "q2"]}));
        let pie = resolve(&table(), &p).unwrap();
        assert_eq!(pie.series.len(), 1);
        assert_eq!(pie.categories, vec!["1", "2"]);

        let p = params(json!({"chart_type": "scatter", "data_columns": ["q2", "q1"]}));
        let scatter = resolve(&table(), &p).unwrap();
        assert_eq!(scatter.category_label.as_deref(), Some("q2"));
        assert_eq!(scatter.categories, vec!["12", "8"]);
        assert_eq!(scatter.series[0].name, "q1");
    }

    #[test]
    fn empty_table_cannot_be_charted() {
        let empty = Table::new("e", vec!["x".into()]);
        let p = params(json!({"chart_type": "bar", "data_columns": "x"}));
        let err = resolve(&empty, &p).unwrap_err();
        assert!(matches!(err, OpError::Validation(_)));
    }
}
