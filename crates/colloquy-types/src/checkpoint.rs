//! Checkpoint types for suspended turns.
//!
//! When an agent interrupts a turn to ask the user something, the engine
//! snapshots the full loop state into a checkpoint. Resuming consumes the
//! checkpoint exactly once and continues the loop where it stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::message::{Message, ToolCall};

/// Why the turn was suspended.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (interrupt_kind IN ('question', 'approval'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptKind {
    /// The agent asked the user one or more questions.
    Question,
    /// The agent requested approval before proceeding.
    Approval,
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptKind::Question => write!(f, "question"),
            InterruptKind::Approval => write!(f, "approval"),
        }
    }
}

impl FromStr for InterruptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "question" => Ok(InterruptKind::Question),
            "approval" => Ok(InterruptKind::Approval),
            other => Err(format!("invalid interrupt kind: '{other}'")),
        }
    }
}

/// A durable snapshot of a suspended turn.
///
/// Holds everything needed to continue the loop: the message history at
/// the moment of interruption, the tool-call batch that was pending, and
/// the provider response cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    /// Logical thread within the session; one live checkpoint per thread.
    pub thread_id: Uuid,
    /// Name of the agent that was running when the interrupt fired.
    pub agent_name: String,
    /// Full message history at suspension, including the assistant message
    /// that carried the interrupting tool call.
    pub messages: Vec<Message>,
    /// The tool-call batch that had not been answered yet.
    pub pending_tools: Vec<ToolCall>,
    pub interrupt_kind: InterruptKind,
    /// Kind-specific payload, e.g. the canonicalized question list.
    pub interrupt_data: serde_json::Value,
    pub provider_response_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: Uuid,
        session_id: Uuid,
        thread_id: Uuid,
        agent_name: impl Into<String>,
        messages: Vec<Message>,
        pending_tools: Vec<ToolCall>,
        interrupt_kind: InterruptKind,
        interrupt_data: serde_json::Value,
        provider_response_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            session_id,
            thread_id,
            agent_name: agent_name.into(),
            messages,
            pending_tools,
            interrupt_kind,
            interrupt_data,
            provider_response_id,
            created_at: Utc::now(),
        }
    }
}
