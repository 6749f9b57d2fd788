use std::collections::{BTreeMap, HashSet};

use serde_json::json;
use xlpilot_engine::{execute, EngineError, OpError, Tables};
use xlpilot_plan::{OperationKind, OperationPlan, RawPlan, TableBinding, PRIMARY_BINDING};
use xlpilot_table::{Table, Value};
use xlpilot_types::FileId;

fn binding(id: &str, sheet: &str) -> TableBinding {
    TableBinding {
        id: id.into(),
        file_id: FileId::new(),
        sheet: sheet.into(),
    }
}

fn plan_with(ops: serde_json::Value, bindings: Vec<TableBinding>) -> OperationPlan {
    let raw: RawPlan =
        serde_json::from_value(json!({"summary": "test plan", "operations": ops})).unwrap();
    OperationPlan {
        summary: raw.summary.clone(),
        estimated_impact: None,
        operations: raw.parse_operations().unwrap(),
        bindings,
    }
}

fn plan(ops: serde_json::Value) -> OperationPlan {
    plan_with(ops, vec![binding(PRIMARY_BINDING, "Sheet1")])
}

fn single(table: Table) -> Tables {
    BTreeMap::from([(PRIMARY_BINDING.to_string(), table)])
}

fn sales() -> Table {
    Table::from_rows(
        "Sheet1",
        ["name", "region", "amt"],
        vec![
            vec!["A".into(), "N".into(), 100.0.into()],
            vec!["B".into(), "S".into(), 50.0.into()],
            vec!["C".into(), "N".into(), 50.0.into()],
            vec!["D".into(), "S".into(), Value::Null],
            vec!["E".into(), "N".into(), 75.0.into()],
        ],
    )
}

#[test]
fn execution_is_deterministic() {
    let p = plan(json!([
        {"type": "FILTER", "params": {"column": "amt", "operator": "not_empty"}},
        {"type": "ADD_COLUMN", "params": {"name": "tax", "formula": "amt * 0.1"}},
        {"type": "SORT", "params": {"keys": [
            {"column": "region"},
            {"column": "tax", "direction": "desc"}
        ]}},
        {"type": "PIVOT", "params": {"index": "region", "values": "amt", "aggfunc": "avg"}},
        {"type": "FORMAT", "params": {"column": "tax", "format_type": "currency"}}
    ]));
    let inputs = single(sales());
    let a = execute(&inputs, &p).unwrap();
    let b = execute(&inputs, &p).unwrap();
    for (id, table) in &a.tables {
        assert_eq!(table.fingerprint(), b.tables[id].fingerprint(), "table {id} differs");
    }
    assert_eq!(a.log, b.log);
}

#[test]
fn filter_twice_equals_filter_once() {
    let f = json!({"type": "FILTER", "params": {"any": [
        {"column": "region", "value": "N"},
        {"column": "amt", "operator": "lt", "value": 60}
    ]}});
    let once = execute(&single(sales()), &plan(json!([f.clone()]))).unwrap();
    let twice = execute(&single(sales()), &plan(json!([f.clone(), f]))).unwrap();
    assert_eq!(once.tables[PRIMARY_BINDING], twice.tables[PRIMARY_BINDING]);
}

#[test]
fn null_aware_filters_are_idempotent() {
    let t = Table::from_rows(
        "Sheet1",
        ["name", "amt"],
        vec![vec!["A".into(), 1.0.into()], vec![Value::Null, 2.0.into()]],
    );
    for cond in [
        json!({"column": "name", "operator": "ne", "value": "A"}),
        json!({"column": "name", "operator": "not_contains", "value": "a"}),
        json!({"column": "name", "operator": "empty"}),
    ] {
        let f = json!({"type": "FILTER", "params": cond});
        let once = execute(&single(t.clone()), &plan(json!([f.clone()]))).unwrap();
        let twice = execute(&single(t.clone()), &plan(json!([f.clone(), f]))).unwrap();
        assert_eq!(once.tables[PRIMARY_BINDING].row_count(), 1, "{cond}");
        assert_eq!(once.tables[PRIMARY_BINDING], twice.tables[PRIMARY_BINDING], "{cond}");
    }
}

#[test]
fn split_keeps_only_named_parts() {
    let t = Table::from_rows("Sheet1", ["full"], vec![vec!["a b c".into()], vec!["d".into()]]);
    let out = execute(
        &single(t),
        &plan(json!([{"type": "SPLIT_COLUMN", "params": {
            "column": "full", "delimiter": " ", "new_columns": ["x", "y"], "drop_original": true
        }}])),
    )
    .unwrap();
    let t = &out.tables[PRIMARY_BINDING];
    assert_eq!(t.columns, vec!["x", "y"]);
    assert_eq!(
        t.rows,
        vec![
            vec![Value::from("a"), Value::from("b")],
            vec![Value::from("d"), Value::Null]
        ]
    );
}

#[test]
fn sort_keeps_ties_in_prior_order() {
    let out = execute(
        &single(sales()),
        &plan(json!([{"type": "SORT", "params": {"column": "amt", "order": "desc"}}])),
    )
    .unwrap();
    let names: Vec<String> = out.tables[PRIMARY_BINDING].column(0).map(|v| v.to_string()).collect();
    assert_eq!(names, vec!["A", "E", "B", "C", "D"]);
}

#[test]
fn sort_descending_example() {
    let t = Table::from_rows(
        "Sheet1",
        ["name", "amt"],
        vec![vec!["A".into(), 100.0.into()], vec!["B".into(), 50.0.into()]],
    );
    let out = execute(
        &single(t),
        &plan(json!([{"type": "SORT", "params": {"column": "amt", "direction": "desc"}}])),
    )
    .unwrap();
    assert_eq!(
        out.tables[PRIMARY_BINDING].rows,
        vec![vec![Value::from("A"), 100.0.into()], vec![Value::from("B"), 50.0.into()]]
    );
}

#[test]
fn forward_fill_example() {
    let t = Table::from_rows("Sheet1", ["amt"], vec![vec![100.0.into()], vec![Value::Null]]);
    let out = execute(
        &single(t),
        &plan(json!([{"type": "FILL", "params": {"column": "amt", "method": "forward"}}])),
    )
    .unwrap();
    assert_eq!(
        out.tables[PRIMARY_BINDING].rows,
        vec![vec![Value::Number(100.0)], vec![Value::Number(100.0)]]
    );
}

#[test]
fn failing_second_operation_rolls_back() {
    let inputs = single(sales());
    let before = inputs[PRIMARY_BINDING].fingerprint();
    let err = execute(
        &inputs,
        &plan(json!([
            {"type": "DELETE_ROWS", "params": {"column": "region", "value": "S"}},
            {"type": "DELETE_COLUMN", "params": {"column": "discount"}}
        ])),
    )
    .unwrap_err();

    match err {
        EngineError::Operation { index, kind, source } => {
            assert_eq!(index, 2);
            assert_eq!(kind, OperationKind::DeleteColumn);
            assert!(matches!(source, OpError::SchemaMismatch(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(inputs[PRIMARY_BINDING].fingerprint(), before);
    assert_eq!(inputs[PRIMARY_BINDING].row_count(), 5);
}

#[test]
fn merge_vertical_counts_and_union() {
    let a = sales();
    let b = Table::from_rows(
        "Q2",
        ["amt", "name", "channel"],
        vec![
            vec![10.0.into(), "F".into(), "web".into()],
            vec![20.0.into(), "G".into(), Value::Null],
        ],
    );
    let mut inputs = single(a.clone());
    inputs.insert("src1".into(), b.clone());
    let p = plan_with(
        json!([{"type": "MERGE_VERTICAL", "params": {"table": "src1"}}]),
        vec![binding(PRIMARY_BINDING, "Sheet1"), binding("src1", "Q2")],
    );
    let out = execute(&inputs, &p).unwrap();
    let merged = &out.tables[PRIMARY_BINDING];

    assert_eq!(merged.row_count(), a.row_count() + b.row_count());
    assert_eq!(merged.columns, vec!["name", "region", "amt", "channel"]);
    let union: HashSet<&String> = a.columns.iter().chain(&b.columns).collect();
    assert_eq!(merged.columns.iter().collect::<HashSet<_>>(), union);

    let channel = merged.column_index("channel").unwrap();
    assert!(merged.rows[..a.row_count()].iter().all(|r| r[channel].is_null()));
    let region = merged.column_index("region").unwrap();
    assert!(merged.rows[a.row_count()..].iter().all(|r| r[region].is_null()));
}

#[test]
fn joins_preserve_primary_rows() {
    let targets = Table::from_rows(
        "Targets",
        ["region", "target", "amt"],
        vec![
            vec!["N".into(), 200.0.into(), 1.0.into()],
            vec!["W".into(), 90.0.into(), 2.0.into()],
        ],
    );
    let mut inputs = single(sales());
    inputs.insert("src1".into(), targets);
    let bindings = vec![binding(PRIMARY_BINDING, "Sheet1"), binding("src1", "Targets")];

    for op in [
        json!({"type": "LOOKUP_JOIN", "params": {
            "key_column": "region", "table": "src1", "return_columns": "target"
        }}),
        json!({"type": "MERGE_HORIZONTAL", "params": {"key_column": "region", "table": "src1"}}),
    ] {
        let out = execute(&inputs, &plan_with(json!([op]), bindings.clone())).unwrap();
        let t = &out.tables[PRIMARY_BINDING];
        assert_eq!(t.row_count(), 5);
        let names: Vec<String> = t.column(0).map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D", "E"]);
        let target = t.column_index("target").unwrap();
        for row in &t.rows {
            let matched = row[1] == Value::from("N");
            assert_eq!(!row[target].is_null(), matched);
        }
    }
}

#[test]
fn deduplicate_leaves_unique_keys() {
    let out = execute(
        &single(sales()),
        &plan(json!([{"type": "DEDUPLICATE", "params": {"columns": ["region"]}}])),
    )
    .unwrap();
    let t = &out.tables[PRIMARY_BINDING];
    let keys: Vec<String> = t.column(1).map(|v| v.key_text()).collect();
    let unique: HashSet<&String> = keys.iter().collect();
    assert_eq!(keys.len(), unique.len());
    assert_eq!(t.row_count(), 2);
}

#[test]
fn pivot_output_is_usable_by_later_steps() {
    let out = execute(
        &single(sales()),
        &plan(json!([
            {"type": "PIVOT", "params": {
                "index": "region", "values": "amt", "output": "by_region"
            }},
            {
                "type": "SORT",
                "params": {"column": "amt", "direction": "desc"},
                "target_table": "by_region"
            },
            {
                "type": "CREATE_CHART",
                "params": {"chart_type": "column", "data_columns": "amt", "label_column": "region"},
                "target_table": "by_region"
            }
        ])),
    )
    .unwrap();
    let pivot = &out.tables["by_region"];
    assert_eq!(pivot.rows[0], vec![Value::from("N"), 225.0.into()]);
    assert_eq!(out.charts.len(), 1);
    assert_eq!(out.charts[0].categories, vec!["N", "S"]);
    assert_eq!(pivot.presentation.charts.len(), 1);
    assert_eq!(out.tables[PRIMARY_BINDING].row_count(), 5);
}
