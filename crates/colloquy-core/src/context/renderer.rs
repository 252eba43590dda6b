//! Rendering compiled context into a model prompt.

use colloquy_types::message::Message;

use super::compiler::CompiledContext;

/// A rendered prompt ready for a model request.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<Message>,
}

/// Flattens compiled blocks into a prompt.
pub trait Renderer: Send + Sync {
    fn render(&self, compiled: &CompiledContext) -> Prompt;
}

/// Default renderer: blocks wrapping a conversation message become chat
/// messages in block order; everything else joins the system prompt,
/// separated by blank lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, compiled: &CompiledContext) -> Prompt {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages = Vec::new();

        for block in &compiled.blocks {
            match &block.message {
                Some(message) => messages.push(message.clone()),
                None if block.content.is_empty() => {}
                None => system_parts.push(&block.content),
            }
        }

        Prompt {
            system: system_parts.join("\n\n"),
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::context::{BlockKind, ContextBlock};
    use colloquy_types::message::MessageRole;
    use uuid::Uuid;

    #[test]
    fn test_render_splits_system_and_messages() {
        let session_id = Uuid::now_v7();
        let compiled = CompiledContext {
            blocks: vec![
                ContextBlock::text(BlockKind::Pinned, "You are a triage agent."),
                ContextBlock::text(BlockKind::State, "open_tickets: 3"),
                ContextBlock::from_message(
                    BlockKind::History,
                    Message::user(session_id, "earlier question"),
                ),
                ContextBlock::from_message(
                    BlockKind::Turn,
                    Message::user(session_id, "current question"),
                ),
            ],
            ..Default::default()
        };

        let prompt = PlainRenderer.render(&compiled);
        assert_eq!(
            prompt.system,
            "You are a triage agent.\n\nopen_tickets: 3"
        );
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, MessageRole::User);
        assert_eq!(prompt.messages[1].content, "current question");
    }

    #[test]
    fn test_render_skips_empty_text_blocks() {
        let compiled = CompiledContext {
            blocks: vec![ContextBlock::text(BlockKind::Reference, "")],
            ..Default::default()
        };
        let prompt = PlainRenderer.render(&compiled);
        assert!(prompt.system.is_empty());
        assert!(prompt.messages.is_empty());
    }
}
