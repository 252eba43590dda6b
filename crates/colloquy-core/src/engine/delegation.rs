//! Delegation to registered sub-agents.
//!
//! `DelegateTool` runs a bounded tool-calling loop for the named sub-agent
//! and returns its final text as the tool result. Sub-agents may delegate
//! further, up to the depth limit. They may not interrupt: a sub-agent
//! asking the user something is an error surfaced to the parent loop.

use std::collections::HashMap;
use std::sync::Arc;

use colloquy_types::message::Message;
use serde::Deserialize;
use tracing::debug;

use super::dispatch::{dispatch_tool_calls, DispatchOutcome};
use super::registry::{AgentDefinition, AgentRegistry};
use crate::errors::{EngineError, ToolError};
use crate::event::EventBus;
use crate::model::{BoxModel, ModelRequest, ToolSchema};
use crate::tool::{BoxTool, Tool, ToolContext, TOOL_DELEGATE};

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    agent: String,
    task: String,
}

/// Built-in tool that hands a sub-task to another registered agent.
pub struct DelegateTool {
    registry: Arc<AgentRegistry>,
    model: Arc<BoxModel>,
    bus: EventBus,
    max_depth: u8,
    max_iterations: u32,
}

impl DelegateTool {
    pub fn new(
        registry: Arc<AgentRegistry>,
        model: Arc<BoxModel>,
        bus: EventBus,
        max_depth: u8,
        max_iterations: u32,
    ) -> Self {
        Self {
            registry,
            model,
            bus,
            max_depth,
            max_iterations,
        }
    }

    async fn run_sub_agent(
        &self,
        agent: &AgentDefinition,
        task: &str,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let tools: HashMap<String, Arc<BoxTool>> = agent
            .tools
            .iter()
            .map(|t| (t.name().to_string(), Arc::clone(t)))
            .collect();
        let schemas: Vec<ToolSchema> = agent
            .tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();

        let mut messages = vec![Message::user(ctx.session_id, task)];
        for iteration in 1..=self.max_iterations {
            let request = ModelRequest {
                system: agent.system_prompt.clone(),
                messages: messages.clone(),
                tools: schemas.clone(),
                previous_response_id: None,
            };

            let response = tokio::select! {
                _ = ctx.cancellation.cancelled() => {
                    return Err(ToolError::Execution("delegation cancelled".into()));
                }
                response = self.model.generate(&request) => response.map_err(|e| {
                    ToolError::Execution(format!("sub-agent model call failed: {e}"))
                })?,
            };

            debug!(
                agent = %agent.name,
                depth = ctx.depth,
                iteration,
                tool_calls = response.tool_calls.len(),
                "sub-agent step"
            );

            messages.push(Message::assistant_with_tool_calls(
                ctx.session_id,
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            match dispatch_tool_calls(&tools, &response.tool_calls, ctx, &self.bus).await {
                Ok(DispatchOutcome::Results(results)) => messages.extend(results),
                Ok(DispatchOutcome::Interrupt { .. }) => {
                    return Err(ToolError::ChildInterrupt {
                        agent: agent.name.clone(),
                    });
                }
                Ok(DispatchOutcome::Fatal { name, error }) => {
                    return Err(ToolError::Execution(format!(
                        "sub-agent tool '{name}' failed: {error}"
                    )));
                }
                Err(EngineError::Cancelled) => {
                    return Err(ToolError::Execution("delegation cancelled".into()));
                }
                Err(e) => return Err(ToolError::Execution(e.to_string())),
            }
        }

        Err(ToolError::Execution(format!(
            "sub-agent '{}' reached the iteration limit",
            agent.name
        )))
    }
}

impl Tool for DelegateTool {
    fn name(&self) -> &str {
        TOOL_DELEGATE
    }

    fn description(&self) -> &str {
        "Delegate a self-contained sub-task to a named agent and receive \
         its final answer. The sub-agent cannot ask the user questions."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the registered agent to delegate to.",
                },
                "task": {
                    "type": "string",
                    "description": "Complete description of the sub-task.",
                },
            },
            "required": ["agent", "task"],
        })
    }

    async fn call(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let args: DelegateArgs = serde_json::from_value(args.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let child_ctx = ctx.child();
        if child_ctx.depth > self.max_depth {
            return Err(ToolError::DepthExceeded {
                depth: child_ctx.depth,
                max: self.max_depth,
            });
        }

        let agent = self
            .registry
            .get(&args.agent)
            .ok_or_else(|| ToolError::UnknownAgent {
                name: args.agent.clone(),
                available: self.registry.names().join(", "),
            })?;

        self.run_sub_agent(&agent, &args.task, &child_ctx).await
    }
}
