use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prompt::{self, Message, RefineOutcome};
use crate::{PlanGenerator, PlanRequest, PlannerError, PlannerReply};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Plan generator backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpPlanGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    deterministic: bool,
    seed: Option<u64>,
}

impl HttpPlanGenerator {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        deterministic: bool,
        seed: Option<u64>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model,
            deterministic,
            seed,
        }
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, PlannerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: if self.deterministic { 0.0 } else { 0.3 },
            seed: if self.deterministic { self.seed } else { None },
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| PlannerError::Transport(format!("HTTP error: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PlannerError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlannerError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| PlannerError::Malformed(format!("chat response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PlannerError::Malformed("chat response has no content".into()))
    }

    /// One chat call, re-asked once with a correction when the reply is not JSON.
    async fn chat_json(
        &self,
        mut messages: Vec<Message>,
    ) -> Result<serde_json::Value, PlannerError> {
        let content = self.chat(&messages).await?;
        match prompt::extract_json(&content) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(error = %e, "planner reply was not JSON, asking again");
                messages.push(Message::assistant(content));
                messages.push(Message::user(prompt::CORRECTION));
                let retry = self.chat(&messages).await?;
                prompt::extract_json(&retry)
            }
        }
    }
}

#[async_trait]
impl PlanGenerator for HttpPlanGenerator {
    async fn generate(&self, req: &PlanRequest) -> Result<PlannerReply, PlannerError> {
        let refined = self.chat_json(prompt::refine_messages(req)).await?;
        match prompt::parse_refine(refined, &req.user_input)? {
            RefineOutcome::Done(reply) => Ok(reply),
            RefineOutcome::NeedPlan { message, requirement } => {
                debug!(%requirement, "requirement refined, requesting plan");
                let value = self.chat_json(prompt::plan_messages(req, &requirement)).await?;
                let plan = prompt::parse_plan(value)?;
                Ok(PlannerReply::Plan { message, plan })
            }
        }
    }
}
