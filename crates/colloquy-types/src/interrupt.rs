//! Question payload carried by a `question` interrupt.
//!
//! The engine canonicalizes raw `ask_user` tool arguments into this shape
//! before checkpointing, so every consumer sees validated questions with
//! stable ids.

use serde::{Deserialize, Serialize};

/// A selectable option within a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Stable id, defaulted to `{question_id}_opt{n}` when absent.
    #[serde(default)]
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// A single question posed to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Stable id, defaulted to `q{n}` when absent.
    #[serde(default)]
    pub id: String,
    pub text: String,
    /// Short label for rendering, at most 50 characters.
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

/// The canonical payload of a question interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub questions: Vec<Question>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_deserializes_with_defaults() {
        let payload: QuestionPayload = serde_json::from_value(serde_json::json!({
            "questions": [
                {
                    "text": "Which quarter?",
                    "options": [
                        {"label": "Q2"},
                        {"label": "Q3"}
                    ]
                }
            ]
        }))
        .unwrap();

        assert_eq!(payload.questions.len(), 1);
        let q = &payload.questions[0];
        assert!(q.id.is_empty());
        assert!(!q.multi_select);
        assert_eq!(q.options[1].label, "Q3");
        assert!(q.options[1].id.is_empty());
    }
}
