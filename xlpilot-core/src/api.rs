//! Request and response shapes shared by the transports.

use serde::{Deserialize, Serialize};
use xlpilot_engine::LogEntry;
use xlpilot_plan::RawPlan;
use xlpilot_types::{Answers, ClarificationQuestion, CopilotError, FileId, FileSchema, SessionId};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RefineRequest {
    pub file_id: FileId,
    /// Further files of a multi-file session, after `file_id`.
    #[serde(default)]
    pub file_ids: Vec<FileId>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub answers: Answers,
    /// Plan the user is following up on, as returned by an earlier round.
    #[serde(default)]
    pub previous_operations: Option<RawPlan>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineStatus {
    NeedClarification,
    Ready,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefineResponse {
    pub status: RefineStatus,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<ClarificationQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_plan: Option<RawPlan>,
}

impl RefineResponse {
    pub fn clarify(
        session_id: SessionId,
        message: String,
        questions: Vec<ClarificationQuestion>,
    ) -> Self {
        Self {
            status: RefineStatus::NeedClarification,
            session_id,
            message: Some(message).filter(|m| !m.is_empty()),
            error_kind: None,
            questions,
            operation_plan: None,
        }
    }

    pub fn ready(session_id: SessionId, message: String, plan: RawPlan) -> Self {
        Self {
            status: RefineStatus::Ready,
            session_id,
            message: Some(message).filter(|m| !m.is_empty()),
            error_kind: None,
            questions: Vec::new(),
            operation_plan: Some(plan),
        }
    }

    pub fn failed(session_id: SessionId, err: &CopilotError) -> Self {
        Self {
            status: RefineStatus::Error,
            session_id,
            message: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            questions: Vec::new(),
            operation_plan: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecuteRequest {
    pub file_id: FileId,
    pub session_id: SessionId,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ExecuteResponse {
    pub fn succeeded(file_id: FileId, summary: String, log: Vec<LogEntry>) -> Self {
        Self {
            success: true,
            file_id: Some(file_id),
            summary: Some(summary),
            download_url: Some(download_url(file_id)),
            log,
            message: None,
            error_kind: None,
        }
    }

    pub fn failed(err: &CopilotError) -> Self {
        Self {
            success: false,
            file_id: None,
            summary: None,
            download_url: None,
            log: Vec::new(),
            message: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        }
    }
}

pub fn download_url(file_id: FileId) -> String {
    format!("/api/download/{file_id}")
}

#[derive(Clone, Debug, Serialize)]
pub struct ContinueResponse {
    pub file_id: FileId,
    pub session_id: SessionId,
    pub schema: FileSchema,
}
