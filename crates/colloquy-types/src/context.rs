//! Context block types for prompt assembly.
//!
//! A context block is a typed unit of prompt content. The compiler in
//! colloquy-core allocates the token budget across block kinds and the
//! renderer flattens the surviving blocks into a model prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::message::Message;

/// Kind of a context block, in descending default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Agent instructions and other always-present content. Never dropped.
    Pinned,
    /// Supporting reference material for the current turn.
    Reference,
    /// Long-lived memory recalled for this turn.
    Memory,
    /// Structured working state. Never dropped.
    State,
    /// Output of a tool call from this or a prior turn.
    ToolOutput,
    /// A prior conversation message.
    History,
    /// The user input driving the current turn.
    Turn,
}

impl BlockKind {
    /// Protected kinds survive every overflow strategy.
    pub fn is_protected(&self) -> bool {
        matches!(self, BlockKind::Pinned | BlockKind::State)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockKind::Pinned => "pinned",
            BlockKind::Reference => "reference",
            BlockKind::Memory => "memory",
            BlockKind::State => "state",
            BlockKind::ToolOutput => "tool_output",
            BlockKind::History => "history",
            BlockKind::Turn => "turn",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pinned" => Ok(BlockKind::Pinned),
            "reference" => Ok(BlockKind::Reference),
            "memory" => Ok(BlockKind::Memory),
            "state" => Ok(BlockKind::State),
            "tool_output" => Ok(BlockKind::ToolOutput),
            "history" => Ok(BlockKind::History),
            "turn" => Ok(BlockKind::Turn),
            other => Err(format!("invalid block kind: '{other}'")),
        }
    }
}

/// A typed unit of prompt content.
///
/// Blocks built from conversation messages keep the original `Message` so
/// the renderer can emit it with role and tool metadata intact; plain text
/// blocks render into the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub kind: BlockKind,
    pub content: String,
    /// The conversation message this block wraps, when it wraps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Whether overflow handling may drop this block. Always false for
    /// protected kinds.
    pub truncatable: bool,
    pub created_at: DateTime<Utc>,
}

impl ContextBlock {
    /// A plain text block. Truncatable unless the kind is protected.
    pub fn text(kind: BlockKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            message: None,
            truncatable: !kind.is_protected(),
            created_at: Utc::now(),
        }
    }

    /// A block wrapping a conversation message. Inherits the message's
    /// timestamp so age-based pruning sees conversation order.
    pub fn from_message(kind: BlockKind, message: Message) -> Self {
        Self {
            kind,
            content: message.content.clone(),
            truncatable: !kind.is_protected(),
            created_at: message.created_at,
            message: Some(message),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            BlockKind::Pinned,
            BlockKind::Reference,
            BlockKind::Memory,
            BlockKind::State,
            BlockKind::ToolOutput,
            BlockKind::History,
            BlockKind::Turn,
        ] {
            let parsed: BlockKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("scratch".parse::<BlockKind>().is_err());
    }

    #[test]
    fn test_protected_kinds_are_not_truncatable() {
        assert!(BlockKind::Pinned.is_protected());
        assert!(BlockKind::State.is_protected());
        assert!(!BlockKind::History.is_protected());

        let pinned = ContextBlock::text(BlockKind::Pinned, "rules");
        assert!(!pinned.truncatable);

        let history = ContextBlock::from_message(
            BlockKind::History,
            Message::user(Uuid::now_v7(), "hello"),
        );
        assert!(history.truncatable);
    }

    #[test]
    fn test_from_message_inherits_timestamp() {
        let msg = Message::user(Uuid::now_v7(), "hello");
        let block = ContextBlock::from_message(BlockKind::History, msg.clone());
        assert_eq!(block.created_at, msg.created_at);
        assert_eq!(block.content, "hello");
    }
}
