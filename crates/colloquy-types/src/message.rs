//! Conversation message types.
//!
//! Messages are the unit of conversation history: user input, assistant
//! replies (possibly carrying tool calls), system notes, and tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Role of a message author.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (role IN ('system', 'user', 'assistant', 'tool'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A source citation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// A file produced by the model or a tool during a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutput {
    pub id: String,
    pub filename: String,
}

/// A single message within a session.
///
/// Messages are ordered by `created_at` within a session. Assistant
/// messages may carry tool calls; tool messages carry the `tool_call_id`
/// of the call they answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result messages: the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_outputs: Vec<FileOutput>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn base(session_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            citations: Vec::new(),
            file_outputs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::User, content)
    }

    pub fn system(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::System, content)
    }

    pub fn assistant(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::Assistant, content)
    }

    pub fn assistant_with_tool_calls(
        session_id: Uuid,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::base(session_id, MessageRole::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// A tool-result message answering the call identified by `tool_call_id`.
    pub fn tool_response(
        session_id: Uuid,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(session_id, MessageRole::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            let parsed: MessageRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("narrator".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_constructors() {
        let session_id = Uuid::now_v7();

        let user = Message::user(session_id, "hello");
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(user.content, "hello");
        assert!(!user.has_tool_calls());

        let call = ToolCall {
            id: "call_1".to_string(),
            name: "search".to_string(),
            arguments: serde_json::json!({"query": "rust"}),
        };
        let assistant =
            Message::assistant_with_tool_calls(session_id, "", vec![call.clone()]);
        assert!(assistant.has_tool_calls());
        assert_eq!(assistant.tool_calls[0].name, "search");

        let result = Message::tool_response(session_id, "call_1", "found 3 results");
        assert_eq!(result.role, MessageRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_message_serde_skips_empty_fields() {
        let msg = Message::user(Uuid::now_v7(), "hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));

        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
