use thiserror::Error;

use crate::{FileId, SessionId};

/// Error taxonomy shared by the refinement loop, the engine boundary and the transports.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CopilotError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("ambiguous reference: {0}")]
    AmbiguousReference(String),
    #[error("plan generator failure: {0}")]
    PlanGeneratorFailure(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("clarification loop detected: still ambiguous after {rounds} rounds")]
    LoopDetected { rounds: u32 },
    #[error("execution aborted at operation {index} ({kind}): {reason}")]
    ExecutionAborted {
        index: usize,
        kind: String,
        reason: String,
    },
    #[error("session {0} not found or expired")]
    SessionNotFound(SessionId),
    #[error("session {0} is busy with another request")]
    SessionBusy(SessionId),
    #[error("file {0} not found")]
    FileNotFound(FileId),
}

impl CopilotError {
    /// Stable snake_case name reported to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            CopilotError::SchemaMismatch(_) => "schema_mismatch",
            CopilotError::AmbiguousReference(_) => "ambiguous_reference",
            CopilotError::PlanGeneratorFailure(_) => "plan_generator_failure",
            CopilotError::ValidationError(_) => "validation_error",
            CopilotError::LoopDetected { .. } => "loop_detected",
            CopilotError::ExecutionAborted { .. } => "execution_aborted",
            CopilotError::SessionNotFound(_) => "session_not_found",
            CopilotError::SessionBusy(_) => "session_busy",
            CopilotError::FileNotFound(_) => "file_not_found",
        }
    }

    /// Errors that end one round but leave the session usable.
    pub fn is_round_local(&self) -> bool {
        !matches!(
            self,
            CopilotError::SessionNotFound(_)
                | CopilotError::SessionBusy(_)
                | CopilotError::FileNotFound(_)
        )
    }
}
