#![forbid(unsafe_code)]

//! The plan generator seam. Everything that turns a request into a plan or a
//! set of clarification questions sits behind [`PlanGenerator`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use xlpilot_plan::{OperationPlan, RawPlan};
use xlpilot_types::{Answers, ClarificationQuestion, FileSchema, Turn};

pub mod http;
pub mod prompt;
pub mod retry;
pub mod scripted;

pub use http::HttpPlanGenerator;
pub use retry::{RetryPolicy, RetryingPlanGenerator};
pub use scripted::ScriptedPlanGenerator;

/// Everything the generator sees for one refinement round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanRequest {
    pub schemas: Vec<FileSchema>,
    pub user_input: String,
    /// All answers collected in the session so far.
    pub answers: Answers,
    /// Questions the answers refer to, for rendering option labels.
    pub questions: Vec<ClarificationQuestion>,
    /// Plan the user is following up on.
    pub previous_plan: Option<OperationPlan>,
    pub history: Vec<Turn>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlannerReply {
    Clarify {
        message: String,
        questions: Vec<ClarificationQuestion>,
    },
    Plan {
        message: String,
        plan: RawPlan,
    },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum PlannerError {
    #[error("planner timed out after {0:?}")]
    Timeout(Duration),
    #[error("planner transport error: {0}")]
    Transport(String),
    #[error("planner returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("planner rejected credentials (HTTP {0})")]
    Auth(u16),
    #[error("malformed planner reply: {0}")]
    Malformed(String),
    #[error("planner unavailable: {0}")]
    Unavailable(String),
}

impl PlannerError {
    /// Worth another attempt: timeouts, transport failures, throttling and server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlannerError::Timeout(_) | PlannerError::Transport(_) => true,
            PlannerError::Status { status, .. } => *status == 429 || *status >= 500,
            PlannerError::Auth(_) | PlannerError::Malformed(_) | PlannerError::Unavailable(_) => {
                false
            }
        }
    }
}

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, req: &PlanRequest) -> Result<PlannerReply, PlannerError>;
}

#[async_trait]
impl<T: PlanGenerator + ?Sized> PlanGenerator for Arc<T> {
    async fn generate(&self, req: &PlanRequest) -> Result<PlannerReply, PlannerError> {
        (**self).generate(req).await
    }
}

/// Generator for deployments without a planner backend.
pub struct NullPlanGenerator;

#[async_trait]
impl PlanGenerator for NullPlanGenerator {
    async fn generate(&self, _req: &PlanRequest) -> Result<PlannerReply, PlannerError> {
        Err(PlannerError::Unavailable("no plan generator configured".into()))
    }
}
