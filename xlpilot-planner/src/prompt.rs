//! Chat messages sent to an OpenAI-compatible model and parsing of its replies.
//!
//! The dialogue is two-phase: a refinement call decides whether the request
//! is clear enough, and a plan call turns the refined requirement into
//! operations. A refinement reply that already carries operations skips the
//! second call.

use serde::{Deserialize, Serialize};
use xlpilot_plan::{OperationKind, RawPlan};
use xlpilot_types::{ClarificationQuestion, FileSchema};

use crate::{PlanRequest, PlannerError, PlannerReply};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Sent after a reply that could not be parsed.
pub const CORRECTION: &str = "Your previous reply was not a valid JSON object. \
    Reply again with the JSON object only, no prose and no code fences.";

const REFINE_INSTRUCTIONS: &str = r#"You help users edit spreadsheets.
You see only the structure of their files, never the data.
Decide whether the request below is precise enough to turn into table operations.
Ask questions only when a column, table or intent is genuinely ambiguous.
Use column names exactly as listed.
Reply with one JSON object:
{"status": "need_clarification" | "ready",
 "message": "short reply to the user",
 "refined_requirement": "the request restated precisely",
 "questions": [{"question_id": "q1", "question": "...", "question_type": "single|multiple|text",
                "options": [{"key": "a", "label": "..."}]}]}
When status is ready you may also include "summary" and "operations" as described for plans."#;

const PLAN_INSTRUCTIONS: &str = r#"Turn the requirement into an ordered list of table operations.
Use only column names that exist at that point of the plan.
Operations run in order; columns added by one step are visible to later steps.
To act on another file or sheet set "table" (a file name or sheet name)
or "source_file_index" in params.
Reply with one JSON object:
{"summary": "...", "estimated_impact": "...",
 "operations": [{"type": "OPERATION_TYPE", "params": {...}, "description": "...",
                 "target_table": "optional binding"}]}"#;

fn operation_catalog() -> String {
    OperationKind::ALL
        .iter()
        .map(|k| k.tag())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Plain-text structure of every bound file, numbered by position.
pub fn describe_schemas(schemas: &[FileSchema]) -> String {
    let mut out = String::new();
    for (i, file) in schemas.iter().enumerate() {
        out.push_str(&format!(
            "File {i}: {} (active sheet: {})\n",
            file.file_name, file.active_sheet
        ));
        for sheet in &file.sheets {
            out.push_str(&format!(
                "  Sheet \"{}\": {} rows x {} columns\n",
                sheet.name, sheet.total_rows, sheet.total_cols
            ));
            for col in &sheet.columns {
                out.push_str(&format!(
                    "    - {} ({}{}, {} distinct)\n",
                    col.name,
                    col.data_type,
                    if col.nullable { ", has blanks" } else { "" },
                    col.unique_count
                ));
            }
        }
    }
    out
}

fn context(req: &PlanRequest) -> String {
    let mut out = format!("Files:\n{}", describe_schemas(&req.schemas));
    if let Some(prev) = &req.previous_plan {
        out.push_str("\nPreviously applied plan (the user may refer to it):\n");
        out.push_str(&prev.describe());
        out.push('\n');
    }
    out
}

fn user_turn(req: &PlanRequest) -> String {
    let mut msg = req.user_input.clone();
    if !req.answers.is_empty() {
        msg.push_str("\n\nAnswers so far:");
        for (id, answer) in &req.answers {
            let rendered = match req.questions.iter().find(|q| &q.question_id == id) {
                Some(q) => format!("{} -> {}", q.question, q.describe(answer)),
                None => format!("{id} -> {}", answer.as_text()),
            };
            msg.push_str(&format!("\n- {rendered}"));
        }
    }
    msg
}

pub fn refine_messages(req: &PlanRequest) -> Vec<Message> {
    let mut messages = vec![Message::system(format!(
        "{REFINE_INSTRUCTIONS}\nOperation types: {}\n\n{}",
        operation_catalog(),
        context(req)
    ))];
    messages.extend(
        req.history
            .iter()
            .map(|t| Message { role: t.role.clone(), content: t.content.clone() }),
    );
    messages.push(Message::user(user_turn(req)));
    messages
}

pub fn plan_messages(req: &PlanRequest, requirement: &str) -> Vec<Message> {
    vec![
        Message::system(format!(
            "{PLAN_INSTRUCTIONS}\nOperation types: {}\n\n{}",
            operation_catalog(),
            context(req)
        )),
        Message::user(requirement.to_string()),
    ]
}

fn strip_fences(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.strip_prefix("json").unwrap_or(rest);
    }
    s.strip_suffix("```").unwrap_or(s).trim()
}

/// The JSON object in a model reply, tolerating code fences and surrounding prose.
pub fn extract_json(content: &str) -> Result<serde_json::Value, PlannerError> {
    let body = strip_fences(content);
    if body.is_empty() {
        return Err(PlannerError::Malformed("empty reply".into()));
    }
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str(body) {
        return Ok(v);
    }
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end])
            .map_err(|e| PlannerError::Malformed(format!("no JSON object in reply: {e}"))),
        _ => Err(PlannerError::Malformed("no JSON object in reply".into())),
    }
}

#[derive(Deserialize)]
struct RefineReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    refined_requirement: Option<String>,
    #[serde(default)]
    questions: Vec<ClarificationQuestion>,
    #[serde(default)]
    operations: Vec<serde_json::Value>,
}

/// What the refinement phase decided.
#[derive(Debug, PartialEq)]
pub enum RefineOutcome {
    Done(PlannerReply),
    /// Clear enough, but the plan still has to be requested.
    NeedPlan { message: String, requirement: String },
}

pub fn parse_refine(
    value: serde_json::Value,
    user_input: &str,
) -> Result<RefineOutcome, PlannerError> {
    let reply: RefineReply =
        serde_json::from_value(value.clone()).map_err(|e| PlannerError::Malformed(e.to_string()))?;
    let message = reply.message.unwrap_or_default();

    if !reply.operations.is_empty() {
        let plan = parse_plan(value)?;
        return Ok(RefineOutcome::Done(PlannerReply::Plan { message, plan }));
    }

    match reply.status.trim().to_ascii_lowercase().as_str() {
        "need_clarification" | "clarify" => {
            if reply.questions.is_empty() {
                return Err(PlannerError::Malformed(
                    "asked for clarification without any question".into(),
                ));
            }
            Ok(RefineOutcome::Done(PlannerReply::Clarify {
                message,
                questions: reply.questions,
            }))
        }
        "ready" => Ok(RefineOutcome::NeedPlan {
            message,
            requirement: reply
                .refined_requirement
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| user_input.to_string()),
        }),
        other => Err(PlannerError::Malformed(format!("unknown status `{other}`"))),
    }
}

pub fn parse_plan(value: serde_json::Value) -> Result<RawPlan, PlannerError> {
    let plan: RawPlan =
        serde_json::from_value(value).map_err(|e| PlannerError::Malformed(e.to_string()))?;
    if plan.operations.is_empty() {
        return Err(PlannerError::Malformed("plan has no operations".into()));
    }
    Ok(plan)
}
