use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{PlanGenerator, PlanRequest, PlannerError, PlannerReply};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Adds a deadline and bounded exponential backoff around another generator.
pub struct RetryingPlanGenerator<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: PlanGenerator> RetryingPlanGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<G: PlanGenerator> PlanGenerator for RetryingPlanGenerator<G> {
    async fn generate(&self, req: &PlanRequest) -> Result<PlannerReply, PlannerError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.backoff;
        let mut attempt = 1;
        loop {
            let call = self.inner.generate(req);
            let result = match tokio::time::timeout(self.policy.timeout, call).await {
                Ok(r) => r,
                Err(_) => Err(PlannerError::Timeout(self.policy.timeout)),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        ?delay,
                        "plan generator failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedPlanGenerator;
    use xlpilot_plan::RawPlan;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    fn plan_reply() -> PlannerReply {
        PlannerReply::Plan {
            message: "ok".into(),
            plan: RawPlan::default(),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let inner = ScriptedPlanGenerator::new();
        inner.push_err(PlannerError::Status { status: 503, body: "busy".into() }).await;
        inner.push(plan_reply()).await;
        let gen = RetryingPlanGenerator::new(inner, policy(3));
        assert_eq!(gen.generate(&PlanRequest::default()).await.unwrap(), plan_reply());
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let inner = ScriptedPlanGenerator::new();
        inner.push_err(PlannerError::Auth(401)).await;
        inner.push(plan_reply()).await;
        let gen = RetryingPlanGenerator::new(inner, policy(3));
        let err = gen.generate(&PlanRequest::default()).await.unwrap_err();
        assert_eq!(err, PlannerError::Auth(401));
    }

    #[tokio::test]
    async fn slow_generator_times_out_after_all_attempts() {
        let inner = ScriptedPlanGenerator::new().with_delay(Duration::from_millis(200));
        for _ in 0..2 {
            inner.push(plan_reply()).await;
        }
        let gen = RetryingPlanGenerator::new(inner, policy(2));
        let err = gen.generate(&PlanRequest::default()).await.unwrap_err();
        assert_eq!(err, PlannerError::Timeout(Duration::from_millis(50)));
    }
}
