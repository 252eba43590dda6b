//! Model trait definition and its type-erased wrapper.
//!
//! `Model` is the abstraction the engine calls for completions. It uses
//! RPITIT for `generate` and `Pin<Box<dyn Stream>>` for `stream` (streams
//! need to be object-safe for the BoxModel wrapper). Concrete provider
//! clients implement `Model`; the engine only ever sees `BoxModel`.

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use colloquy_types::message::{Message, ToolCall};

/// Errors from model calls.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transient failure worth retrying (network blip, 5xx).
    #[error("transient model error: {0}")]
    Transient(String),

    /// Provider asked us to back off.
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Permanent failure; retrying will not help.
    #[error("model error: {0}")]
    Permanent(String),

    /// The provider returned something we could not parse.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_) | ModelError::RateLimited { .. })
    }
}

/// Static description of a model backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier, e.g. "gpt-4o" or "claude-sonnet".
    pub name: String,
    /// Provider name, e.g. "openai".
    pub provider: String,
}

/// Declared schema of a tool, sent to the model so it can emit calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool arguments.
    pub parameters: serde_json::Value,
}

/// A completion request assembled by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Provider response cursor from the previous call, when the provider
    /// keeps conversation state server-side.
    pub previous_response_id: Option<String>,
}

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    /// Empty when the model produced a final answer.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    /// Cursor for the next call's `previous_response_id`.
    pub provider_response_id: Option<String>,
}

/// An incremental event from a streaming model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelChunk {
    TextDelta { text: String },
    ToolCalls { tool_calls: Vec<ToolCall> },
    Usage { usage: TokenUsage },
    Done,
}

/// Trait for model backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition) for
/// `generate`. The `stream` method returns a boxed stream because streams
/// need to be object-safe for `BoxModel`.
pub trait Model: Send + Sync {
    fn info(&self) -> &ModelInfo;

    /// Send a completion request and receive the full response.
    fn generate(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;

    /// Send a streaming completion request. Returns a stream of chunks.
    fn stream(
        &self,
        request: ModelRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send + 'static>>;
}

/// Object-safe version of [`Model`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch (`dyn ModelDyn`). A blanket
/// implementation is provided for all types implementing `Model`.
pub trait ModelDyn: Send + Sync {
    fn info(&self) -> &ModelInfo;

    fn generate_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send + 'a>>;

    fn stream_boxed(
        &self,
        request: ModelRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send + 'static>>;
}

impl<T: Model> ModelDyn for T {
    fn info(&self) -> &ModelInfo {
        Model::info(self)
    }

    fn generate_boxed<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelError>> + Send + 'a>> {
        Box::pin(self.generate(request))
    }

    fn stream_boxed(
        &self,
        request: ModelRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send + 'static>> {
        self.stream(request)
    }
}

/// Type-erased model for runtime backend selection.
///
/// Since `Model` uses RPITIT, it cannot be used as a trait object directly.
/// `BoxModel` provides equivalent methods that delegate to the inner
/// `ModelDyn` trait object.
pub struct BoxModel {
    inner: Box<dyn ModelDyn + Send + Sync>,
}

impl BoxModel {
    pub fn new<T: Model + 'static>(model: T) -> Self {
        Self {
            inner: Box::new(model),
        }
    }

    pub fn info(&self) -> &ModelInfo {
        self.inner.info()
    }

    pub async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.inner.generate_boxed(request).await
    }

    pub fn stream(
        &self,
        request: ModelRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send + 'static>> {
        self.inner.stream_boxed(request)
    }
}

impl std::fmt::Debug for BoxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxModel")
            .field("info", self.inner.info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct EchoModel {
        info: ModelInfo,
    }

    impl Model for EchoModel {
        fn info(&self) -> &ModelInfo {
            &self.info
        }

        async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ModelResponse {
                content: format!("echo: {last}"),
                tool_calls: Vec::new(),
                usage: TokenUsage {
                    input_tokens: 3,
                    output_tokens: 4,
                },
                provider_response_id: None,
            })
        }

        fn stream(
            &self,
            request: ModelRequest,
        ) -> Pin<Box<dyn Stream<Item = Result<ModelChunk, ModelError>> + Send + 'static>> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Box::pin(async_stream::stream! {
                yield Ok(ModelChunk::TextDelta { text: format!("echo: {last}") });
                yield Ok(ModelChunk::Done);
            })
        }
    }

    fn request(content: &str) -> ModelRequest {
        ModelRequest {
            system: String::new(),
            messages: vec![Message::user(uuid::Uuid::now_v7(), content)],
            tools: Vec::new(),
            previous_response_id: None,
        }
    }

    #[tokio::test]
    async fn test_box_model_delegates_generate() {
        let model = BoxModel::new(EchoModel {
            info: ModelInfo {
                name: "echo-1".to_string(),
                provider: "test".to_string(),
            },
        });
        assert_eq!(model.info().name, "echo-1");

        let response = model.generate(&request("hi")).await.unwrap();
        assert_eq!(response.content, "echo: hi");
        assert_eq!(response.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn test_box_model_delegates_stream() {
        let model = BoxModel::new(EchoModel {
            info: ModelInfo {
                name: "echo-1".to_string(),
                provider: "test".to_string(),
            },
        });

        let chunks: Vec<_> = model.stream(request("hi")).collect().await;
        assert_eq!(chunks.len(), 2);
        match chunks[0].as_ref().unwrap() {
            ModelChunk::TextDelta { text } => assert_eq!(text, "echo: hi"),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.add(TokenUsage {
            input_tokens: u32::MAX,
            output_tokens: 1,
        });
        assert_eq!(total.input_tokens, u32::MAX);
        assert_eq!(total.output_tokens, 6);
    }
}
