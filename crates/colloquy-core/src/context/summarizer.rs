//! History summarization for the `Compact` overflow strategy.
//!
//! `HistorySummarizer` condenses the oldest history blocks into a short
//! summary via a model call, freeing token budget for recent conversation.

use std::sync::Arc;

use colloquy_types::context::ContextBlock;
use colloquy_types::message::Message;
use uuid::Uuid;

use crate::model::{BoxModel, ModelError, ModelRequest};

/// System prompt for the summarization model call.
const SUMMARY_SYSTEM_PROMPT: &str = r#"Summarize the following conversation segment concisely. Preserve:
1. Key decisions and conclusions
2. Important facts mentioned
3. The user's current goals and context
4. Any unresolved questions

Keep the summary under 500 words. Write in third person (e.g., "The user asked about..." "The assistant recommended...")."#;

/// Prefix on the synthesized summary block so it is recognizable in the
/// rendered prompt.
pub const SUMMARY_PREFIX: &str = "[Conversation summary]";

/// Condenses history blocks into a summary using a model call.
pub struct HistorySummarizer {
    model: Arc<BoxModel>,
}

impl HistorySummarizer {
    pub fn new(model: Arc<BoxModel>) -> Self {
        Self { model }
    }

    /// Summarize a run of history blocks into a concise text summary.
    #[tracing::instrument(name = "summarize_history", skip_all, fields(block_count = blocks.len()))]
    pub async fn summarize(&self, blocks: &[ContextBlock]) -> Result<String, ModelError> {
        if blocks.is_empty() {
            return Ok(String::new());
        }

        let conversation_text: String = blocks
            .iter()
            .map(|b| match &b.message {
                Some(m) => format!("{}: {}", m.role, m.content),
                None => b.content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = ModelRequest {
            system: SUMMARY_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(
                Uuid::now_v7(),
                format!(
                    "Please summarize this conversation:\n\n<conversation>\n{conversation_text}\n</conversation>"
                ),
            )],
            tools: Vec::new(),
            previous_response_id: None,
        };

        let response = self.model.generate(&request).await?;
        Ok(response.content.trim().to_string())
    }
}
