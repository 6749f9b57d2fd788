use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xlpilot_engine::{EngineError, LogEntry, Tables};
use xlpilot_plan::{disambiguate, OperationPlan};
use xlpilot_planner::PlanGenerator;
use xlpilot_receipts::{digest, ExecutionReceipt, Outcome, ReceiptLog};
use xlpilot_session::{RefineState, SessionStore};
use xlpilot_store::{ArrowBatchHandle, StoreError, StoredFile, TableStore};
use xlpilot_table::WorkbookDocument;
use xlpilot_types::{CopilotError, FileId, FileSchema, SessionId};

use crate::api::{ContinueResponse, ExecuteRequest, ExecuteResponse, RefineRequest, RefineResponse};
use crate::config::Settings;
use crate::refine::{context_plan, Refiner, RoundInput};

fn store_error(e: StoreError) -> CopilotError {
    match e {
        StoreError::NotFound(id) => CopilotError::FileNotFound(id),
        other => CopilotError::ValidationError(other.to_string()),
    }
}

fn engine_error(e: EngineError) -> CopilotError {
    match e {
        EngineError::UnboundTable(id) => {
            CopilotError::SchemaMismatch(format!("binding `{id}` has no table"))
        }
        EngineError::Operation { index, kind, source } => CopilotError::ExecutionAborted {
            index,
            kind: kind.to_string(),
            reason: source.to_string(),
        },
    }
}

/// Copies of every bound sheet, keyed by binding id.
pub fn bind_inputs(plan: &OperationPlan, files: &[&StoredFile]) -> Result<Tables, CopilotError> {
    let mut tables = Tables::new();
    for b in &plan.bindings {
        let file = files
            .iter()
            .find(|f| f.file_id == b.file_id)
            .ok_or(CopilotError::FileNotFound(b.file_id))?;
        let sheet = file.sheet(&b.sheet).ok_or_else(|| {
            CopilotError::SchemaMismatch(format!("`{}` has no sheet `{}`", file.file_name, b.sheet))
        })?;
        tables.insert(b.id.clone(), sheet.clone());
    }
    Ok(tables)
}

fn processed_name(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    format!("processed_{stem}.xlsx")
}

/// The output workbook: `primary` with its bound sheets replaced by their
/// results and every derived table appended as a new sheet.
pub fn materialize(
    primary: &StoredFile,
    plan: &OperationPlan,
    tables: &Tables,
    file_id: FileId,
) -> Result<StoredFile, CopilotError> {
    let mut sheets = primary.sheets.clone();
    for b in plan.bindings.iter().filter(|b| b.file_id == primary.file_id) {
        let slot = sheets.iter_mut().find(|s| s.name == b.sheet);
        if let (Some(slot), Some(result)) = (slot, tables.get(&b.id)) {
            let mut result = result.clone();
            result.name = b.sheet.clone();
            *slot = result;
        }
    }
    for (id, table) in tables {
        if plan.binding(id).is_some() {
            continue;
        }
        let taken: Vec<String> = sheets.iter().map(|s| s.name.clone()).collect();
        let mut derived = table.clone();
        derived.name = disambiguate(&table.name, &taken);
        sheets.push(derived);
    }
    StoredFile::new(file_id, processed_name(&primary.file_name), sheets).map_err(store_error)
}

/// Owns the stores and the planner, and serves the four user-facing operations.
pub struct Copilot {
    settings: Settings,
    store: Arc<dyn TableStore>,
    sessions: Arc<SessionStore>,
    planner: Arc<dyn PlanGenerator>,
    receipts: Option<Arc<ReceiptLog>>,
    executions: Arc<Semaphore>,
}

impl Copilot {
    pub fn new(
        settings: Settings,
        store: Arc<dyn TableStore>,
        planner: Arc<dyn PlanGenerator>,
        receipts: Option<Arc<ReceiptLog>>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(settings.session_ttl()));
        let executions = Arc::new(Semaphore::new(settings.max_concurrent_executions.max(1)));
        Self {
            settings,
            store,
            sessions,
            planner,
            receipts,
            executions,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.sessions.spawn_sweeper(self.settings.sweep_interval())
    }

    /// Stores an uploaded workbook and returns its schema.
    pub async fn ingest(&self, doc: WorkbookDocument) -> Result<FileSchema, CopilotError> {
        let file = StoredFile::from_document(FileId::new(), doc).map_err(store_error)?;
        let schema = file.schema();
        self.store.insert(file).await.map_err(store_error)?;
        info!(
            file = %schema.file_id,
            name = %schema.file_name,
            sheets = schema.sheets.len(),
            "workbook ingested"
        );
        Ok(schema)
    }

    pub async fn schema(&self, file_id: FileId) -> Result<FileSchema, CopilotError> {
        self.store.schema(file_id).await.map_err(store_error)
    }

    pub async fn download(&self, file_id: FileId) -> Result<WorkbookDocument, CopilotError> {
        Ok(self.store.get(file_id).await.map_err(store_error)?.to_document())
    }

    /// Ingests a workbook handed over as one record batch per sheet.
    pub async fn ingest_batches(
        &self,
        file_name: &str,
        sheets: &[(String, ArrowBatchHandle)],
    ) -> Result<FileSchema, CopilotError> {
        let file = StoredFile::from_batches(FileId::new(), file_name, sheets).map_err(store_error)?;
        let schema = file.schema();
        self.store.insert(file).await.map_err(store_error)?;
        info!(
            file = %schema.file_id,
            name = %schema.file_name,
            sheets = schema.sheets.len(),
            "batches ingested"
        );
        Ok(schema)
    }

    pub async fn export_batches(
        &self,
        file_id: FileId,
    ) -> Result<Vec<(String, ArrowBatchHandle)>, CopilotError> {
        self.store
            .get(file_id)
            .await
            .map_err(store_error)?
            .to_batches()
            .map_err(store_error)
    }

    /// One refinement round. Session-level failures are errors; everything
    /// else is reported in the response body.
    pub async fn refine(&self, req: RefineRequest) -> Result<RefineResponse, CopilotError> {
        let mut requested = vec![req.file_id];
        for id in &req.file_ids {
            if !requested.contains(id) {
                requested.push(*id);
            }
        }

        let session_id = match req.session_id {
            Some(id) => id,
            None => {
                // Fail on blank requests and unknown files before a session exists for them.
                let blank = req.user_input.as_deref().map_or(true, |s| s.trim().is_empty());
                if blank && req.answers.values().all(|a| a.is_empty()) {
                    return Err(CopilotError::ValidationError(
                        "user_input or answers are required".into(),
                    ));
                }
                for id in &requested {
                    self.store.get(*id).await.map_err(store_error)?;
                }
                self.sessions.create(requested.clone())
            }
        };
        let mut session = self.sessions.acquire(session_id)?;

        let same_set = req.file_ids.is_empty() || session.file_ids == requested;
        if !session.is_bound_to(req.file_id) || !same_set {
            let err = CopilotError::ValidationError(format!(
                "session {session_id} is bound to another file set"
            ));
            return Ok(RefineResponse::failed(session_id, &err));
        }

        let mut schemas = Vec::with_capacity(session.file_ids.len());
        for id in &session.file_ids {
            schemas.push(self.store.schema(*id).await.map_err(store_error)?);
        }

        let refiner = Refiner::new(
            self.planner.as_ref(),
            self.settings.max_clarification_rounds,
            self.settings.fuzzy_threshold,
        );
        let input = RoundInput {
            user_input: req.user_input,
            answers: req.answers,
            previous_plan: req.previous_operations.as_ref().map(context_plan),
        };
        Ok(refiner.round(&mut session, &schemas, input).await)
    }

    /// Runs the session's confirmed plan. The plan is consumed either way;
    /// the session is dropped after a successful run.
    pub async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteResponse, CopilotError> {
        let mut session = self.sessions.acquire(req.session_id)?;
        if !req.confirmed {
            let err = CopilotError::ValidationError("execution must be confirmed".into());
            return Ok(ExecuteResponse::failed(&err));
        }
        if !session.is_bound_to(req.file_id) {
            let err = CopilotError::ValidationError(format!(
                "session {} is bound to another file",
                session.id
            ));
            return Ok(ExecuteResponse::failed(&err));
        }
        let Some(plan) = session.ready_plan.take() else {
            let err =
                CopilotError::ValidationError("no confirmed plan; refine the request first".into());
            return Ok(ExecuteResponse::failed(&err));
        };

        match self.run_plan(session.id, &plan).await {
            Ok((file_id, log)) => {
                drop(session);
                self.sessions.remove(req.session_id);
                Ok(ExecuteResponse::succeeded(file_id, plan.summary, log))
            }
            Err(err) if err.is_round_local() => {
                session.state = RefineState::Error;
                session.last_error = Some(err.clone());
                Ok(ExecuteResponse::failed(&err))
            }
            Err(err) => Err(err),
        }
    }

    async fn run_plan(
        &self,
        session_id: SessionId,
        plan: &OperationPlan,
    ) -> Result<(FileId, Vec<LogEntry>), CopilotError> {
        let primary = plan
            .primary()
            .ok_or_else(|| CopilotError::ValidationError("plan has no primary table".into()))?
            .file_id;

        let mut files: Vec<Arc<StoredFile>> = Vec::new();
        for b in &plan.bindings {
            if !files.iter().any(|f| f.file_id == b.file_id) {
                files.push(self.store.get(b.file_id).await.map_err(store_error)?);
            }
        }
        let borrowed: Vec<&StoredFile> = files.iter().map(Arc::as_ref).collect();
        let inputs = bind_inputs(plan, &borrowed)?;

        let plan_json = serde_json::to_string(plan).unwrap_or_default();
        let plan_hash = digest([plan_json.as_str()]);
        let fingerprints: Vec<String> = plan
            .bindings
            .iter()
            .filter_map(|b| inputs.get(&b.id))
            .map(|t| t.fingerprint())
            .collect();
        let input_hash = digest(fingerprints.iter().map(String::as_str));
        let receipt = |outcome| {
            ExecutionReceipt::new(
                session_id,
                primary,
                plan_hash.clone(),
                input_hash.clone(),
                plan.operations.len(),
                outcome,
            )
        };

        let permit = Arc::clone(&self.executions)
            .acquire_owned()
            .await
            .map_err(|_| CopilotError::ValidationError("executor is shutting down".into()))?;
        let job = plan.clone();
        let result = tokio::task::spawn_blocking(move || xlpilot_engine::execute(&inputs, &job))
            .await
            .map_err(|e| CopilotError::ExecutionAborted {
                index: 0,
                kind: "engine".into(),
                reason: e.to_string(),
            })?;
        drop(permit);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = engine_error(e);
                let index = match &err {
                    CopilotError::ExecutionAborted { index, .. } => *index,
                    _ => 0,
                };
                warn!(session = %session_id, error = %err, "execution aborted");
                self.record(receipt(Outcome::Aborted {
                    index,
                    reason: err.to_string(),
                }));
                return Err(err);
            }
        };

        let source = borrowed
            .iter()
            .find(|f| f.file_id == primary)
            .ok_or(CopilotError::FileNotFound(primary))?;
        let output = materialize(source, plan, &outcome.tables, FileId::new())?;
        let output_prints: Vec<String> = output.sheets.iter().map(|t| t.fingerprint()).collect();
        let output_hash = digest(output_prints.iter().map(String::as_str));
        let output_id = self.store.insert(output).await.map_err(store_error)?;

        self.record(
            receipt(Outcome::Committed {
                output_file_id: output_id,
            })
            .with_output_hash(output_hash),
        );
        info!(
            session = %session_id,
            output = %output_id,
            operations = outcome.log.len(),
            "plan committed"
        );
        Ok((output_id, outcome.log))
    }

    fn record(&self, receipt: ExecutionReceipt) {
        if let Some(log) = &self.receipts {
            if let Err(e) = log.append(receipt) {
                warn!(error = %e, "receipt not written");
            }
        }
    }

    /// Copies a produced file under a new id and opens a fresh session on it.
    pub async fn continue_from(&self, file_id: FileId) -> Result<ContinueResponse, CopilotError> {
        let new_id = self.store.duplicate(file_id).await.map_err(store_error)?;
        let schema = self.store.schema(new_id).await.map_err(store_error)?;
        let session_id = self.sessions.create(vec![new_id]);
        info!(from = %file_id, file = %new_id, session = %session_id, "continuing from output");
        Ok(ContinueResponse {
            file_id: new_id,
            session_id,
            schema,
        })
    }
}
