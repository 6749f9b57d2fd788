//! The clarification dialogue. One call is one round: ask the planner, then
//! either record its questions or resolve its plan against the live schema.
//! Nothing is written to the session until the planner's reply has been
//! fully processed, so a failed or cancelled round leaves it as it was.

use tracing::{info, warn};
use xlpilot_plan::{OperationPlan, PlannedOperation, RawPlan};
use xlpilot_planner::{PlanGenerator, PlanRequest, PlannerReply};
use xlpilot_session::{RefineState, Session};
use xlpilot_types::{Answers, ClarificationQuestion, CopilotError, FileSchema, Turn};

use crate::api::RefineResponse;
use crate::resolve::resolve_plan;

/// What the caller brings to one round.
#[derive(Clone, Debug, Default)]
pub struct RoundInput {
    pub user_input: Option<String>,
    pub answers: Answers,
    pub previous_plan: Option<OperationPlan>,
}

pub struct Refiner<'a> {
    planner: &'a dyn PlanGenerator,
    max_rounds: u32,
    threshold: f64,
}

/// Best-effort typed view of a plan sent back by a client, for planner context only.
/// Operations that no longer parse are left out.
pub fn context_plan(raw: &RawPlan) -> OperationPlan {
    OperationPlan {
        summary: raw.summary.clone(),
        estimated_impact: raw.estimated_impact.clone(),
        operations: raw
            .operations
            .iter()
            .cloned()
            .filter_map(|op| PlannedOperation::try_from(op).ok())
            .collect(),
        bindings: Vec::new(),
    }
}

fn user_turn(text: &str, answers: &Answers, questions: &[ClarificationQuestion]) -> Turn {
    let mut content = text.to_string();
    for (id, answer) in answers {
        let rendered = questions
            .iter()
            .find(|q| &q.question_id == id)
            .map(|q| format!("{}: {}", q.question, q.describe(answer)))
            .unwrap_or_else(|| format!("{id}: {}", answer.as_text()));
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&rendered);
    }
    Turn::user(content)
}

impl<'a> Refiner<'a> {
    pub fn new(planner: &'a dyn PlanGenerator, max_rounds: u32, threshold: f64) -> Self {
        Self {
            planner,
            max_rounds,
            threshold,
        }
    }

    /// Runs one round on `session`, which must be bound to `files` (primary first).
    pub async fn round(
        &self,
        session: &mut Session,
        files: &[FileSchema],
        input: RoundInput,
    ) -> RefineResponse {
        let text = input.user_input.unwrap_or_default().trim().to_string();
        let fresh: Answers = input.answers.into_iter().filter(|(_, a)| !a.is_empty()).collect();
        if text.is_empty() && fresh.is_empty() && session.history.is_empty() {
            let err = CopilotError::ValidationError("user_input or answers are required".into());
            return RefineResponse::failed(session.id, &err);
        }

        let mut answers = session.answers.clone();
        answers.extend(fresh.clone());

        // New free text after a detected loop starts a fresh streak.
        let loop_reset = !text.is_empty()
            && matches!(session.last_error, Some(CopilotError::LoopDetected { .. }));
        let streak = if loop_reset {
            0
        } else {
            session.clarification_streak
        };

        let mut questions = session.asked.clone();
        questions.extend(session.pending_questions.iter().cloned());
        let request = PlanRequest {
            schemas: files.to_vec(),
            user_input: text.clone(),
            answers: answers.clone(),
            questions: questions.clone(),
            previous_plan: input.previous_plan.or_else(|| session.last_plan.clone()),
            history: session.history.clone(),
        };

        let reply = match self.planner.generate(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(session = %session.id, error = %e, "plan generator failed");
                let err = CopilotError::PlanGeneratorFailure(e.to_string());
                return RefineResponse::failed(session.id, &err);
            }
        };

        let user = user_turn(&text, &fresh, &questions);
        match reply {
            PlannerReply::Clarify { questions: asked, .. } if asked.is_empty() => {
                let err = CopilotError::PlanGeneratorFailure(
                    "clarification requested without questions".into(),
                );
                warn!(session = %session.id, "empty clarification reply");
                RefineResponse::failed(session.id, &err)
            }
            PlannerReply::Clarify { message, questions: asked } => {
                let streak = streak + 1;
                let assistant = Turn::assistant(describe_questions(&message, &asked));
                self.commit(session, answers, user, assistant);
                session.clarification_streak = streak;

                if streak > self.max_rounds {
                    let err = CopilotError::LoopDetected { rounds: self.max_rounds };
                    warn!(session = %session.id, streak, "clarification loop detected");
                    session.pending_questions.clear();
                    session.ready_plan = None;
                    session.state = RefineState::Error;
                    session.last_error = Some(err.clone());
                    return RefineResponse::failed(session.id, &err);
                }

                session.asked.extend(session.pending_questions.drain(..));
                session
                    .asked
                    .retain(|old| !asked.iter().any(|q| q.question_id == old.question_id));
                session.pending_questions = asked.clone();
                session.ready_plan = None;
                session.state = RefineState::AwaitingAnswers;
                session.last_error = None;
                info!(
                    session = %session.id,
                    round = session.round,
                    questions = asked.len(),
                    "awaiting answers"
                );
                RefineResponse::clarify(session.id, message, asked)
            }
            PlannerReply::Plan { message, plan } => {
                let resolved = resolve_plan(&plan, files, self.threshold);
                let assistant = match &resolved {
                    Ok(p) => Turn::assistant(p.describe()),
                    Err(e) => Turn::assistant(format!("{}\n(rejected: {e})", plan.summary)),
                };
                self.commit(session, answers, user, assistant);
                session.clarification_streak = 0;
                session.asked.extend(session.pending_questions.drain(..));

                match resolved {
                    Ok(plan) => {
                        info!(
                            session = %session.id,
                            round = session.round,
                            operations = plan.operations.len(),
                            "plan ready"
                        );
                        let raw = plan.to_raw();
                        session.last_plan = Some(plan.clone());
                        session.ready_plan = Some(plan);
                        session.state = RefineState::Ready;
                        session.last_error = None;
                        RefineResponse::ready(session.id, message, raw)
                    }
                    Err(err) => {
                        warn!(session = %session.id, error = %err, "plan rejected");
                        session.ready_plan = None;
                        session.state = RefineState::Error;
                        session.last_error = Some(err.clone());
                        RefineResponse::failed(session.id, &err)
                    }
                }
            }
        }
    }

    fn commit(&self, session: &mut Session, answers: Answers, user: Turn, assistant: Turn) {
        session.answers = answers;
        session.history.push(user);
        session.history.push(assistant);
        session.round += 1;
    }
}

fn describe_questions(message: &str, questions: &[ClarificationQuestion]) -> String {
    let mut out = message.to_string();
    for q in questions {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("- {}", q.question));
    }
    out
}
