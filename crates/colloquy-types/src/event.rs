//! Engine lifecycle events.
//!
//! Events are published on a broadcast bus as turns execute. Publishing is
//! fire-and-forget: a slow or absent subscriber never stalls the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event emitted during turn execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A turn began executing (fresh or resumed).
    TurnStarted {
        session_id: Uuid,
        tenant_id: Uuid,
        agent_name: String,
        is_resume: bool,
    },
    /// A turn finished with a final assistant message.
    TurnCompleted {
        session_id: Uuid,
        tenant_id: Uuid,
        agent_name: String,
        iterations: u32,
        input_tokens: u32,
        output_tokens: u32,
        duration_ms: u64,
    },
    /// A turn aborted with an error.
    TurnFailed {
        session_id: Uuid,
        tenant_id: Uuid,
        agent_name: String,
        error: String,
        duration_ms: u64,
    },
    /// A model call is about to be issued.
    ModelCallStarted {
        session_id: Uuid,
        tenant_id: Uuid,
        model: String,
        message_count: usize,
        tool_count: usize,
    },
    /// A model call returned.
    ModelCallCompleted {
        session_id: Uuid,
        tenant_id: Uuid,
        model: String,
        input_tokens: u32,
        output_tokens: u32,
        tool_call_count: usize,
        duration_ms: u64,
    },
    /// A tool call was dispatched.
    ToolStarted {
        session_id: Uuid,
        tenant_id: Uuid,
        call_id: String,
        name: String,
    },
    /// A tool call returned a result.
    ToolCompleted {
        session_id: Uuid,
        tenant_id: Uuid,
        call_id: String,
        name: String,
        duration_ms: u64,
    },
    /// A tool call failed.
    ToolFailed {
        session_id: Uuid,
        tenant_id: Uuid,
        call_id: String,
        name: String,
        error: String,
    },
    /// The turn suspended on a user-facing question.
    InterruptRaised {
        session_id: Uuid,
        tenant_id: Uuid,
        checkpoint_id: Uuid,
        agent_name: String,
        question_count: usize,
    },
    /// The context compiler compacted history to fit the token budget.
    ContextCompacted {
        session_id: Uuid,
        tenant_id: Uuid,
        summarized_blocks: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::ToolStarted {
            session_id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            call_id: "call_1".to_string(),
            name: "search".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_started");
        assert_eq!(json["name"], "search");
    }

    #[test]
    fn test_event_round_trip() {
        let event = EngineEvent::InterruptRaised {
            session_id: Uuid::now_v7(),
            tenant_id: Uuid::now_v7(),
            checkpoint_id: Uuid::now_v7(),
            agent_name: "triage".to_string(),
            question_count: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        match back {
            EngineEvent::InterruptRaised { question_count, .. } => {
                assert_eq!(question_count, 2)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
