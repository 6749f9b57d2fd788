use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    #[default]
    #[serde(alias = "single_choice", alias = "radio")]
    Single,
    #[serde(alias = "multiple_choice", alias = "checkbox", alias = "multi")]
    Multiple,
    #[serde(alias = "free_text", alias = "input")]
    Text,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A disambiguating question raised by the planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub question_id: String,
    pub question: String,
    #[serde(default)]
    pub question_type: QuestionKind,
    #[serde(default)]
    pub options: Vec<ClarificationOption>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ClarificationQuestion {
    /// Human-readable rendering of an answer, using option labels when the keys match.
    pub fn describe(&self, answer: &Answer) -> String {
        let label = |key: &str| {
            self.options
                .iter()
                .find(|o| o.key == key)
                .map(|o| o.label.clone())
                .unwrap_or_else(|| key.to_string())
        };
        match answer {
            Answer::One(key) => label(key),
            Answer::Many(keys) => keys.iter().map(|k| label(k)).collect::<Vec<_>>().join(", "),
        }
    }
}

/// One submitted answer: a single option key or free text, or several keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    One(String),
    Many(Vec<String>),
}

impl Answer {
    pub fn is_empty(&self) -> bool {
        match self {
            Answer::One(s) => s.trim().is_empty(),
            Answer::Many(v) => v.iter().all(|s| s.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Answer::One(s) => s.clone(),
            Answer::Many(v) => v.join(", "),
        }
    }
}

/// Accumulated answers keyed by question id.
pub type Answers = BTreeMap<String, Answer>;

/// One message of the dialogue kept for planner context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_accept_single_and_multiple_forms() {
        let answers: Answers =
            serde_json::from_str(r#"{"q1": "desc", "q2": ["a", "b"]}"#).unwrap();
        assert_eq!(answers["q1"], Answer::One("desc".into()));
        assert_eq!(answers["q2"].as_text(), "a, b");
    }

    #[test]
    fn question_defaults_fill_missing_fields() {
        let q: ClarificationQuestion = serde_json::from_str(
            r#"{"question_id": "q1", "question": "Which column?",
                "question_type": "multiple_choice"}"#,
        )
        .unwrap();
        assert_eq!(q.question_type, QuestionKind::Multiple);
        assert!(q.required);
        assert!(q.options.is_empty());
    }

    #[test]
    fn describe_prefers_labels() {
        let q = ClarificationQuestion {
            question_id: "order".into(),
            question: "Sort order?".into(),
            question_type: QuestionKind::Single,
            options: vec![ClarificationOption {
                key: "desc".into(),
                label: "Largest first".into(),
                description: None,
            }],
            required: true,
        };
        assert_eq!(q.describe(&Answer::One("desc".into())), "Largest first");
        assert_eq!(q.describe(&Answer::One("other".into())), "other");
    }
}
