use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use xlpilot_core::{bind_inputs, materialize, resolve_plan, Settings};
use xlpilot_engine::LogEntry;
use xlpilot_plan::RawPlan;
use xlpilot_receipts::{tail, verify_log};
use xlpilot_store::StoredFile;
use xlpilot_table::WorkbookDocument;
use xlpilot_types::{FileId, FileSchema};

#[derive(Parser)]
#[command(name = "xlpilot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the inferred schema of a workbook document.
    Schema { file: PathBuf },
    /// Run a plan against workbook documents without the planner.
    Run {
        /// Primary workbook first, then any secondary ones.
        #[arg(long = "table", required = true)]
        tables: Vec<PathBuf>,
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },
    Receipts {
        #[command(subcommand)]
        action: ReceiptCommand,
        #[arg(long, default_value = "./receipts.jsonl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum ReceiptCommand {
    Tail {
        #[arg(long, short = 'n', default_value_t = 10)]
        lines: usize,
    },
    Verify,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load(doc: WorkbookDocument) -> anyhow::Result<StoredFile> {
    Ok(StoredFile::from_document(FileId::new(), doc)?)
}

/// Resolves and executes `raw` against `docs`; the first document is the primary one.
fn run_plan(
    docs: Vec<WorkbookDocument>,
    raw: &RawPlan,
    threshold: f64,
) -> anyhow::Result<(WorkbookDocument, Vec<LogEntry>)> {
    let files = docs.into_iter().map(load).collect::<anyhow::Result<Vec<_>>>()?;
    let primary = files.first().context("no input tables")?;
    let schemas: Vec<FileSchema> = files.iter().map(StoredFile::schema).collect();

    let plan = resolve_plan(raw, &schemas, threshold)?;
    let refs: Vec<&StoredFile> = files.iter().collect();
    let inputs = bind_inputs(&plan, &refs)?;
    let outcome = xlpilot_engine::execute(&inputs, &plan)?;
    let output = materialize(primary, &plan, &outcome.tables, FileId::new())?;
    Ok((output.to_document(), outcome.log))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Schema { file } => {
            let stored = load(read_json(&file)?)?;
            println!("{}", serde_json::to_string_pretty(&stored.schema())?);
        }
        Command::Run {
            tables,
            plan,
            out,
            threshold,
        } => {
            let docs: Vec<WorkbookDocument> = tables
                .iter()
                .map(|p| read_json(p))
                .collect::<anyhow::Result<_>>()?;
            let raw: RawPlan = read_json(&plan)?;
            let threshold = match threshold {
                Some(t) => t,
                None => Settings::load()?.fuzzy_threshold,
            };
            let (doc, log) = run_plan(docs, &raw, threshold)?;
            for entry in &log {
                println!(
                    "{:>3} {:<16} {:<12} {} rows x {} cols  {}",
                    entry.index, entry.kind, entry.table, entry.rows, entry.columns, entry.detail
                );
            }
            fs::write(&out, serde_json::to_string_pretty(&doc)?)
                .with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {} to {}", doc.file_name, out.display());
        }
        Command::Receipts { action, path } => match action {
            ReceiptCommand::Tail { lines } => {
                for receipt in tail(&path, lines)? {
                    println!("{}", serde_json::to_string(&receipt)?);
                }
            }
            ReceiptCommand::Verify => {
                let (count, _) = verify_log(&path)?;
                println!("receipt log ok ({count} receipts)");
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xlpilot_table::Value;

    fn doc(value: serde_json::Value) -> WorkbookDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn runs_a_plan_over_primary_and_lookup_workbooks() {
        let sales = doc(json!({
            "file_name": "sales.xlsx",
            "sheets": [{
                "name": "Sheet1",
                "columns": ["Region", "Amount"],
                "rows": [["N", 10], ["S", 30], ["N", 20]]
            }]
        }));
        let managers = doc(json!({
            "file_name": "managers.xlsx",
            "sheets": [{
                "name": "Sheet1",
                "columns": ["Region", "Manager"],
                "rows": [["N", "Ana"], ["S", "Sam"]]
            }]
        }));
        let raw: RawPlan = serde_json::from_value(json!({
            "summary": "Add managers, biggest first",
            "operations": [
                {"type": "LOOKUP", "params": {
                    "source_file": "managers", "key_column": "region", "return_columns": ["manager"]
                }},
                {"type": "SORT", "params": {"column": "amount", "order": "desc"}}
            ]
        }))
        .unwrap();

        let (out, log) = run_plan(vec![sales, managers], &raw, 0.85).unwrap();
        assert_eq!(out.file_name, "processed_sales.xlsx");
        assert_eq!(out.sheets[0].columns, vec!["Region", "Amount", "Manager"]);
        assert_eq!(out.sheets[0].rows[0][2], Value::Text("Sam".into()));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn unresolvable_column_fails_before_execution() {
        let sales = doc(json!({
            "file_name": "sales.xlsx",
            "sheets": [{"name": "Sheet1", "columns": ["Amount"], "rows": [[1]]}]
        }));
        let raw: RawPlan = serde_json::from_value(json!({
            "summary": "x",
            "operations": [{"type": "DELETE_COLUMN", "params": {"column": "Quantity"}}]
        }))
        .unwrap();
        let err = run_plan(vec![sales], &raw, 0.85).unwrap_err();
        assert!(err.to_string().contains("Quantity"), "{err}");
    }
}
