//! Tool trait definition and its type-erased wrapper.
//!
//! Tools are the actions an agent can take. The engine dispatches a batch
//! of tool calls in parallel and reinserts results in call order; each
//! call runs with a [`ToolContext`] carrying tenancy and cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::ToolError;

/// Name of the built-in interrupt tool. Calls to it are intercepted by the
/// engine and never executed.
pub const TOOL_ASK_USER: &str = "ask_user";

/// Name of the built-in delegation tool.
pub const TOOL_DELEGATE: &str = "delegate";

/// Per-call execution context passed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    /// Delegation depth of the calling loop; 0 for the root agent.
    pub depth: u8,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: Uuid, tenant_id: Uuid, cancellation: CancellationToken) -> Self {
        Self {
            session_id,
            tenant_id,
            depth: 0,
            cancellation,
        }
    }

    /// A context for a sub-agent spawned by this one, one level deeper.
    pub fn child(&self) -> Self {
        Self {
            session_id: self.session_id,
            tenant_id: self.tenant_id,
            depth: self.depth.saturating_add(1),
            cancellation: self.cancellation.child_token(),
        }
    }
}

/// Trait for agent tools.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition) for `call`.
/// Concrete tools are wrapped in [`BoxTool`] for dynamic dispatch.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the tool arguments.
    fn schema(&self) -> serde_json::Value;

    /// Whether a failure of this tool aborts the whole turn. Non-fatal
    /// failures are fed back to the model as error results instead.
    fn fatal(&self) -> bool {
        false
    }

    fn call(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Value,
    ) -> impl Future<Output = Result<String, ToolError>> + Send;
}

/// Object-safe version of [`Tool`] with boxed futures.
pub trait ToolDyn: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> serde_json::Value;

    fn fatal(&self) -> bool;

    fn call_boxed<'a>(
        &'a self,
        ctx: &'a ToolContext,
        args: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;
}

impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> &str {
        Tool::description(self)
    }

    fn schema(&self) -> serde_json::Value {
        Tool::schema(self)
    }

    fn fatal(&self) -> bool {
        Tool::fatal(self)
    }

    fn call_boxed<'a>(
        &'a self,
        ctx: &'a ToolContext,
        args: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>> {
        Box::pin(self.call(ctx, args))
    }
}

/// Type-erased tool.
///
/// Since `Tool` uses RPITIT, it cannot be used as a trait object directly.
/// `BoxTool` provides equivalent methods that delegate to the inner
/// `ToolDyn` trait object.
pub struct BoxTool {
    inner: Box<dyn ToolDyn + Send + Sync>,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        Self {
            inner: Box::new(tool),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn description(&self) -> &str {
        self.inner.description()
    }

    pub fn schema(&self) -> serde_json::Value {
        self.inner.schema()
    }

    pub fn fatal(&self) -> bool {
        self.inner.fatal()
    }

    pub async fn call(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Value,
    ) -> Result<String, ToolError> {
        self.inner.call_boxed(ctx, args).await
    }
}

impl std::fmt::Debug for BoxTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTool")
            .field("name", &self.inner.name())
            .finish()
    }
}

type FnToolHandler = Arc<
    dyn Fn(
            ToolContext,
            serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A tool built from a closure, for simple tools and tests.
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    fatal: bool,
    handler: FnToolHandler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            fatal: false,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }

    /// Mark failures of this tool as turn-aborting.
    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn fatal(&self) -> bool {
        self.fatal
    }

    async fn call(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Value,
    ) -> Result<String, ToolError> {
        (self.handler)(ctx.clone(), args.clone()).await
    }
}
