use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{PlanGenerator, PlanRequest, PlannerError, PlannerReply};

/// Replays queued replies in order and records every request it receives.
/// Used for offline runs and tests.
#[derive(Default)]
pub struct ScriptedPlanGenerator {
    replies: Mutex<VecDeque<Result<PlannerReply, PlannerError>>>,
    requests: Mutex<Vec<PlanRequest>>,
    delay: Option<Duration>,
}

impl ScriptedPlanGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn push(&self, reply: PlannerReply) {
        self.replies.lock().await.push_back(Ok(reply));
    }

    pub async fn push_err(&self, err: PlannerError) {
        self.replies.lock().await.push_back(Err(err));
    }

    pub async fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PlanGenerator for ScriptedPlanGenerator {
    async fn generate(&self, req: &PlanRequest) -> Result<PlannerReply, PlannerError> {
        self.requests.lock().await.push(req.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(PlannerError::Unavailable("script exhausted".into())))
    }
}
