//! Interrupt canonicalization and the built-in `ask_user` tool.
//!
//! `ask_user` is the one tool the engine never executes: a call to it
//! suspends the turn instead. Raw arguments are canonicalized into a
//! [`QuestionPayload`] first, so checkpoints always hold validated
//! questions with stable ids.

use std::collections::HashMap;

use colloquy_types::interrupt::QuestionPayload;
use serde_json::Value;

use crate::errors::{EngineError, ToolError};
use crate::tool::{Tool, ToolContext, TOOL_ASK_USER};

const MAX_QUESTIONS: usize = 4;
const MIN_OPTIONS: usize = 2;
const MAX_OPTIONS: usize = 4;
const MAX_HEADER_LEN: usize = 50;

/// Validate raw `ask_user` arguments and normalize them into the
/// canonical payload shape.
///
/// Rules: 1 to 4 questions, each with non-empty text, a non-empty header
/// of at most 50 characters, and 2 to 4 options, every option carrying a
/// label and a description. Missing question ids default to `q{n}` and
/// missing option ids to `{question_id}_opt{n}`; ids must be unique.
/// Anything else is rejected, never repaired.
pub fn canonicalize_questions(args: &Value) -> Result<QuestionPayload, EngineError> {
    let mut payload: QuestionPayload = serde_json::from_value(args.clone())
        .map_err(|e| EngineError::InvalidInterrupt(format!("malformed questions: {e}")))?;

    if payload.questions.is_empty() {
        return Err(EngineError::InvalidInterrupt(
            "at least one question is required".into(),
        ));
    }
    if payload.questions.len() > MAX_QUESTIONS {
        return Err(EngineError::InvalidInterrupt(format!(
            "at most {MAX_QUESTIONS} questions are allowed, got {}",
            payload.questions.len()
        )));
    }

    let mut seen_ids: Vec<String> = Vec::new();
    for (qi, question) in payload.questions.iter_mut().enumerate() {
        if question.text.trim().is_empty() {
            return Err(EngineError::InvalidInterrupt(format!(
                "question {} has empty text",
                qi + 1
            )));
        }
        if question.header.trim().is_empty() {
            return Err(EngineError::InvalidInterrupt(format!(
                "question {} has no header",
                qi + 1
            )));
        }
        if question.header.chars().count() > MAX_HEADER_LEN {
            return Err(EngineError::InvalidInterrupt(format!(
                "question {} header exceeds {MAX_HEADER_LEN} characters",
                qi + 1
            )));
        }
        if question.id.is_empty() {
            question.id = format!("q{}", qi + 1);
        }
        if seen_ids.contains(&question.id) {
            return Err(EngineError::InvalidInterrupt(format!(
                "duplicate question id '{}'",
                question.id
            )));
        }
        seen_ids.push(question.id.clone());

        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&question.options.len()) {
            return Err(EngineError::InvalidInterrupt(format!(
                "question '{}' must have {MIN_OPTIONS} to {MAX_OPTIONS} options, got {}",
                question.id,
                question.options.len()
            )));
        }

        let mut seen_options: Vec<String> = Vec::new();
        for (oi, option) in question.options.iter_mut().enumerate() {
            if option.label.trim().is_empty() {
                return Err(EngineError::InvalidInterrupt(format!(
                    "question '{}' has an option with an empty label",
                    question.id
                )));
            }
            if option.description.trim().is_empty() {
                return Err(EngineError::InvalidInterrupt(format!(
                    "question '{}' option '{}' has no description",
                    question.id, option.label
                )));
            }
            if option.id.is_empty() {
                option.id = format!("{}_opt{}", question.id, oi + 1);
            }
            if seen_options.contains(&option.id) {
                return Err(EngineError::InvalidInterrupt(format!(
                    "duplicate option id '{}' in question '{}'",
                    option.id, question.id
                )));
            }
            seen_options.push(option.id.clone());
        }
    }

    Ok(payload)
}

/// Check that every question has an answer and build the tool-result
/// payload the model sees on resume.
pub fn answers_payload(
    payload: &QuestionPayload,
    answers: &HashMap<String, Value>,
) -> Result<Value, EngineError> {
    let mut responses = serde_json::Map::new();
    for question in &payload.questions {
        let answer = answers
            .get(&question.id)
            .ok_or_else(|| EngineError::MissingAnswer(question.id.clone()))?;
        responses.insert(question.id.clone(), answer.clone());
    }
    Ok(Value::Object(responses))
}

/// Short human-readable form of the payload, for logs and events.
pub fn describe_questions(payload: &QuestionPayload) -> String {
    payload
        .questions
        .iter()
        .map(|q| q.header.clone())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The built-in interrupt tool.
///
/// Exposes a schema so the model can emit calls to it; the engine
/// intercepts those calls before dispatch, so `call` is unreachable in a
/// correctly wired loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct AskUserTool;

impl Tool for AskUserTool {
    fn name(&self) -> &str {
        TOOL_ASK_USER
    }

    fn description(&self) -> &str {
        "Ask the user one or more clarifying questions. Use this when you \
         cannot proceed without input. The turn pauses until the user answers."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": MAX_QUESTIONS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "text": {"type": "string"},
                            "header": {
                                "type": "string",
                                "maxLength": MAX_HEADER_LEN,
                            },
                            "multi_select": {"type": "boolean"},
                            "options": {
                                "type": "array",
                                "minItems": MIN_OPTIONS,
                                "maxItems": MAX_OPTIONS,
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "id": {"type": "string"},
                                        "label": {"type": "string"},
                                        "description": {"type": "string"},
                                    },
                                    "required": ["label", "description"],
                                },
                            },
                        },
                        "required": ["text", "header", "options"],
                    },
                },
            },
            "required": ["questions"],
        })
    }

    async fn call(&self, _ctx: &ToolContext, _args: &Value) -> Result<String, ToolError> {
        Err(ToolError::Execution(
            "ask_user is handled by the engine and cannot be executed directly".into(),
        ))
    }
}
