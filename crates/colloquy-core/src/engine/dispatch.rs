//! Parallel tool dispatch.
//!
//! A tool-call batch runs concurrently on a `JoinSet`, but results are
//! reinserted by the original call index, so the conversation always shows
//! them in the order the model asked for them. An `ask_user` call preempts
//! the whole batch: nothing executes and the turn suspends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use colloquy_types::event::EngineEvent;
use colloquy_types::interrupt::QuestionPayload;
use colloquy_types::message::{Message, ToolCall};
use tokio::task::JoinSet;
use tracing::warn;

use super::interrupt::canonicalize_questions;
use crate::errors::{EngineError, ToolError};
use crate::event::EventBus;
use crate::tool::{BoxTool, ToolContext, TOOL_ASK_USER};

/// How a dispatched batch ended.
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    /// The batch contained an `ask_user` call; nothing was executed.
    Interrupt {
        call: ToolCall,
        payload: QuestionPayload,
    },
    /// A fatal tool failed; the turn must abort.
    Fatal { name: String, error: ToolError },
    /// One tool-result message per call, in original call order.
    Results(Vec<Message>),
}

pub(crate) async fn dispatch_tool_calls(
    tools: &HashMap<String, Arc<BoxTool>>,
    calls: &[ToolCall],
    ctx: &ToolContext,
    bus: &EventBus,
) -> Result<DispatchOutcome, EngineError> {
    // Interrupts are batch-exclusive: when the model asks the user
    // something, running sibling calls first would leave their results
    // stranded behind the suspension.
    if let Some(pos) = calls.iter().position(|c| c.name == TOOL_ASK_USER) {
        if calls.iter().filter(|c| c.name == TOOL_ASK_USER).count() > 1 {
            return Err(EngineError::InvalidInterrupt(
                "multiple ask_user calls in one batch".into(),
            ));
        }
        let call = calls[pos].clone();
        bus.publish(EngineEvent::ToolStarted {
            session_id: ctx.session_id,
            tenant_id: ctx.tenant_id,
            call_id: call.id.clone(),
            name: call.name.clone(),
        });
        let payload = canonicalize_questions(&call.arguments)?;
        return Ok(DispatchOutcome::Interrupt { call, payload });
    }

    let mut slots: Vec<Option<Message>> = vec![None; calls.len()];
    let mut set: JoinSet<(usize, ToolCall, bool, Result<String, ToolError>, u64)> =
        JoinSet::new();

    for (idx, call) in calls.iter().enumerate() {
        bus.publish(EngineEvent::ToolStarted {
            session_id: ctx.session_id,
            tenant_id: ctx.tenant_id,
            call_id: call.id.clone(),
            name: call.name.clone(),
        });

        let Some(tool) = tools.get(&call.name).cloned() else {
            bus.publish(EngineEvent::ToolFailed {
                session_id: ctx.session_id,
                tenant_id: ctx.tenant_id,
                call_id: call.id.clone(),
                name: call.name.clone(),
                error: "unknown tool".to_string(),
            });
            slots[idx] = Some(Message::tool_response(
                ctx.session_id,
                &call.id,
                format!("Error: unknown tool '{}'", call.name),
            ));
            continue;
        };

        let call = call.clone();
        let task_ctx = ctx.clone();
        set.spawn(async move {
            let started = Instant::now();
            let fatal = tool.fatal();
            let result = tool.call(&task_ctx, &call.arguments).await;
            (idx, call, fatal, result, started.elapsed().as_millis() as u64)
        });
    }

    loop {
        let joined = tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                set.abort_all();
                return Err(EngineError::Cancelled);
            }
            joined = set.join_next() => joined,
        };
        let Some(joined) = joined else { break };

        match joined {
            Ok((idx, call, _, Ok(content), duration_ms)) => {
                bus.publish(EngineEvent::ToolCompleted {
                    session_id: ctx.session_id,
                    tenant_id: ctx.tenant_id,
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    duration_ms,
                });
                slots[idx] = Some(Message::tool_response(ctx.session_id, &call.id, content));
            }
            Ok((idx, call, fatal, Err(error), _)) => {
                bus.publish(EngineEvent::ToolFailed {
                    session_id: ctx.session_id,
                    tenant_id: ctx.tenant_id,
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    error: error.to_string(),
                });
                if fatal {
                    set.abort_all();
                    return Ok(DispatchOutcome::Fatal {
                        name: call.name,
                        error,
                    });
                }
                // Non-fatal failures become error results the model can
                // react to.
                slots[idx] = Some(Message::tool_response(
                    ctx.session_id,
                    &call.id,
                    format!("Error: {error}"),
                ));
            }
            Err(join_err) => {
                warn!(error = %join_err, "tool task aborted");
            }
        }
    }

    let results = calls
        .iter()
        .zip(slots)
        .map(|(call, slot)| {
            slot.unwrap_or_else(|| {
                Message::tool_response(
                    ctx.session_id,
                    &call.id,
                    format!("Error: tool '{}' did not produce a result", call.name),
                )
            })
        })
        .collect();
    Ok(DispatchOutcome::Results(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FnTool;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> ToolContext {
        ToolContext::new(Uuid::now_v7(), Uuid::now_v7(), CancellationToken::new())
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    fn sleepy_tool(name: &str, delay_ms: u64) -> (String, Arc<BoxTool>) {
        let reply = format!("{name} done");
        (
            name.to_string(),
            Arc::new(BoxTool::new(FnTool::new(
                name,
                "test tool",
                json!({"type": "object"}),
                move |_ctx, _args| {
                    let reply = reply.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        Ok(reply)
                    }
                },
            ))),
        )
    }

    #[tokio::test]
    async fn test_results_follow_call_order_not_completion_order() {
        let tools: HashMap<_, _> = [
            sleepy_tool("slow", 80),
            sleepy_tool("medium", 40),
            sleepy_tool("fast", 5),
        ]
        .into_iter()
        .collect();

        let calls = vec![
            call("c1", "slow", json!({})),
            call("c2", "medium", json!({})),
            call("c3", "fast", json!({})),
        ];

        let outcome = dispatch_tool_calls(&tools, &calls, &ctx(), &EventBus::new(16))
            .await
            .unwrap();
        let DispatchOutcome::Results(results) = outcome else {
            panic!("expected results");
        };

        let ids: Vec<_> = results
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(results[0].content, "slow done");
        assert_eq!(results[2].content, "fast done");
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let tools: HashMap<_, _> = [sleepy_tool("real", 1)].into_iter().collect();
        let calls = vec![
            call("c1", "ghost", json!({})),
            call("c2", "real", json!({})),
        ];

        let outcome = dispatch_tool_calls(&tools, &calls, &ctx(), &EventBus::new(16))
            .await
            .unwrap();
        let DispatchOutcome::Results(results) = outcome else {
            panic!("expected results");
        };
        assert!(results[0].content.contains("unknown tool 'ghost'"));
        assert_eq!(results[1].content, "real done");
    }

    #[tokio::test]
    async fn test_fatal_tool_aborts_batch() {
        let fatal = FnTool::new(
            "guard",
            "fatal tool",
            json!({"type": "object"}),
            |_ctx, _args| async move {
                Err::<String, _>(ToolError::Execution("integrity check failed".into()))
            },
        )
        .with_fatal(true);

        let tools: HashMap<_, _> = [
            ("guard".to_string(), Arc::new(BoxTool::new(fatal))),
            sleepy_tool("slow", 200),
        ]
        .into_iter()
        .collect();

        let calls = vec![
            call("c1", "slow", json!({})),
            call("c2", "guard", json!({})),
        ];

        let outcome = dispatch_tool_calls(&tools, &calls, &ctx(), &EventBus::new(16))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Fatal { name, .. } if name == "guard"
        ));
    }

    #[tokio::test]
    async fn test_ask_user_preempts_batch() {
        let tools: HashMap<_, _> = [sleepy_tool("real", 1)].into_iter().collect();
        let calls = vec![
            call("c1", "real", json!({})),
            call(
                "c2",
                TOOL_ASK_USER,
                json!({"questions": [{
                    "text": "Which region should the rollout target?",
                    "header": "Region",
                    "options": [
                        {"label": "EU", "description": "European regions"},
                        {"label": "US", "description": "North American regions"}
                    ]
                }]}),
            ),
        ];

        let outcome = dispatch_tool_calls(&tools, &calls, &ctx(), &EventBus::new(16))
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Interrupt { call, payload } => {
                assert_eq!(call.id, "c2");
                assert_eq!(payload.questions[0].id, "q1");
            }
            other => panic!("expected interrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_ask_user_calls_rejected() {
        let tools = HashMap::new();
        let calls = vec![
            call("c1", TOOL_ASK_USER, json!({"questions": [{"text": "a"}]})),
            call("c2", TOOL_ASK_USER, json!({"questions": [{"text": "b"}]})),
        ];

        let err = dispatch_tool_calls(&tools, &calls, &ctx(), &EventBus::new(16))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterrupt(_)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_dispatch() {
        let tools: HashMap<_, _> = [sleepy_tool("slow", 5_000)].into_iter().collect();
        let calls = vec![call("c1", "slow", json!({}))];

        let ctx = ctx();
        let cancel = ctx.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = dispatch_tool_calls(&tools, &calls, &ctx, &EventBus::new(16))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
