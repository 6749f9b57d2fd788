#![forbid(unsafe_code)]

//! Plan interpreter. Operations run in order against a staged copy of the
//! bound tables; callers only ever see the staged copy when every operation
//! has succeeded.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use xlpilot_plan::{Operation, OperationKind, OperationPlan};
use xlpilot_table::{ChartDirective, Table};

mod chart;
mod ops;

/// Tables keyed by binding id.
pub type Tables = BTreeMap<String, Table>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum OpError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("plan binding `{0}` has no table")]
    UnboundTable(String),
    #[error("operation {index} ({kind}) failed: {source}")]
    Operation {
        /// 1-based position in the plan.
        index: usize,
        kind: OperationKind,
        #[source]
        source: OpError,
    },
}

/// One line of the execution log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
    pub index: usize,
    pub kind: OperationKind,
    pub table: String,
    pub rows: usize,
    pub columns: usize,
    pub detail: String,
}

#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub tables: Tables,
    pub log: Vec<LogEntry>,
    pub charts: Vec<ChartDirective>,
}

/// Runs `plan` against `inputs`. `inputs` is never modified.
pub fn execute(inputs: &Tables, plan: &OperationPlan) -> Result<ExecutionOutcome, EngineError> {
    if let Some(missing) = plan.bindings.iter().find(|b| !inputs.contains_key(&b.id)) {
        return Err(EngineError::UnboundTable(missing.id.clone()));
    }

    let mut staged = inputs.clone();
    let mut log = Vec::with_capacity(plan.operations.len());
    let mut charts = Vec::new();

    for (i, planned) in plan.operations.iter().enumerate() {
        let index = i + 1;
        let kind = planned.kind();
        let target = planned.target();
        let detail = apply(&mut staged, target, &planned.op, &mut charts)
            .map_err(|source| EngineError::Operation { index, kind, source })?;

        let (rows, columns) = staged
            .get(target)
            .map(|t| (t.row_count(), t.width()))
            .unwrap_or_default();
        debug!(index, kind = %kind, table = target, rows, columns, %detail, "operation applied");
        log.push(LogEntry {
            index,
            kind,
            table: target.to_string(),
            rows,
            columns,
            detail,
        });
    }

    info!(operations = log.len(), charts = charts.len(), "plan executed");
    Ok(ExecutionOutcome {
        tables: staged,
        log,
        charts,
    })
}

fn apply(
    tables: &mut Tables,
    target: &str,
    op: &Operation,
    charts: &mut Vec<ChartDirective>,
) -> Result<String, OpError> {
    let unknown = |id: &str| OpError::Validation(format!("no table is bound as `{id}`"));

    if let Operation::Pivot(p) = op {
        let table = tables.get(target).ok_or_else(|| unknown(target))?;
        let output_id = p.output_id(target);
        let pivoted = ops::aggregate::pivot(table, p, &output_id)?;
        let detail = format!(
            "pivoted into `{output_id}` with {} rows and {} columns",
            pivoted.row_count(),
            pivoted.width()
        );
        tables.insert(output_id, pivoted);
        return Ok(detail);
    }

    let source = match op.source() {
        Some(src) => {
            let id = src
                .table
                .as_deref()
                .ok_or_else(|| OpError::Validation("secondary table is not bound".into()))?;
            Some(tables.get(id).cloned().ok_or_else(|| unknown(id))?)
        }
        None => None,
    };
    let table = tables.get_mut(target).ok_or_else(|| unknown(target))?;

    match (op, source.as_ref()) {
        (Operation::Filter(c), _) => ops::filter::filter(table, c),
        (Operation::DeleteRows(c), _) => ops::filter::delete_rows(table, c),
        (Operation::Sort(p), _) => ops::sort::sort(table, p),
        (Operation::AddColumn(p), _) => ops::columns::add_column(table, p),
        (Operation::DeleteColumn(p), _) => ops::columns::delete_columns(table, p),
        (Operation::SplitColumn(p), _) => ops::columns::split_column(table, p),
        (Operation::MergeColumns(p), _) => ops::columns::merge_columns(table, p),
        (Operation::Deduplicate(p), _) => ops::cleanup::deduplicate(table, p),
        (Operation::Replace(p), _) => ops::cleanup::replace(table, p),
        (Operation::Fill(p), _) => ops::cleanup::fill(table, p),
        (Operation::Calculate(p), _) => ops::aggregate::calculate(table, p),
        (Operation::Format(p), _) => ops::present::format(table, p),
        (Operation::Style(s), _) => ops::present::style(table, s),
        (Operation::CreateChart(p), _) => {
            let directive = chart::resolve(table, p)?;
            let detail = format!(
                "{:?} chart `{}` with {} series",
                directive.kind,
                directive.title,
                directive.series.len()
            );
            table.presentation.charts.push(directive.clone());
            charts.push(directive);
            Ok(detail)
        }
        (Operation::LookupJoin(p), Some(src)) => ops::join::lookup_join(table, src, p),
        (Operation::MergeHorizontal(p), Some(src)) => ops::join::merge_horizontal(table, src, p),
        (Operation::MergeVertical(p), Some(src)) => ops::join::merge_vertical(table, src, p),
        (
            Operation::LookupJoin(_) | Operation::MergeHorizontal(_) | Operation::MergeVertical(_),
            None,
        ) => {
            Err(OpError::Validation("secondary table is not bound".into()))
        }
        (Operation::Pivot(_), _) => Err(OpError::Validation("pivot handled above".into())),
    }
}
