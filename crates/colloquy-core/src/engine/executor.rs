//! The turn executor: the tool-calling loop with interrupt and resume.
//!
//! A turn runs as: compile context, call the model, dispatch tool calls,
//! repeat until the model answers in text or the iteration limit trips.
//! An `ask_user` call suspends the turn into a checkpoint; `resume`
//! consumes the checkpoint exactly once and continues the same loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use colloquy_types::checkpoint::{Checkpoint, InterruptKind};
use colloquy_types::context::{BlockKind, ContextBlock};
use colloquy_types::error::RepositoryError;
use colloquy_types::event::EngineEvent;
use colloquy_types::interrupt::{Question, QuestionPayload};
use colloquy_types::message::{Message, MessageRole, ToolCall};
use colloquy_types::session::Session;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::dispatch::{dispatch_tool_calls, DispatchOutcome};
use super::interrupt::{answers_payload, describe_questions};
use super::locks::SessionLocks;
use crate::checkpoint::CheckpointStore;
use crate::context::{ContextCompiler, ContextPolicy, HistorySummarizer, Renderer, TokenEstimator};
use crate::errors::{ConfigError, EngineError};
use crate::event::EventBus;
use crate::model::{BoxModel, ModelError, ModelRequest, ModelResponse, TokenUsage, ToolSchema};
use crate::repository::SessionRepository;
use crate::tool::{BoxTool, ToolContext, TOOL_ASK_USER};

/// Validated configuration for an [`Executor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name of the agent this executor runs as.
    pub agent_name: String,
    pub system_prompt: String,
    pub policy: ContextPolicy,
    /// Maximum model-call iterations per turn.
    pub max_iterations: u32,
    /// Retries for transient model failures, per call.
    pub model_retries: u32,
}

impl ExecutorConfig {
    pub fn new(
        agent_name: impl Into<String>,
        system_prompt: impl Into<String>,
        policy: ContextPolicy,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            system_prompt: system_prompt.into(),
            policy,
            max_iterations: 10,
            model_retries: 2,
        }
    }
}

/// A request to run one fresh turn.
#[derive(Debug)]
pub struct TurnRequest {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    /// Logical thread within the session; defaults to the session id.
    pub thread_id: Uuid,
    pub input: String,
    /// Extra context blocks for this turn (reference, memory, state).
    pub working_blocks: Vec<ContextBlock>,
    pub deadline: Option<Duration>,
    pub cancellation: CancellationToken,
}

impl TurnRequest {
    pub fn new(
        session_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        input: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            tenant_id,
            user_id,
            thread_id: session_id,
            input: input.into(),
            working_blocks: Vec::new(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// A request to resume a suspended turn with the user's answers.
#[derive(Debug)]
pub struct ResumeRequest {
    pub tenant_id: Uuid,
    pub checkpoint_id: Uuid,
    /// One answer per question id in the checkpointed payload.
    pub answers: HashMap<String, serde_json::Value>,
    pub deadline: Option<Duration>,
    pub cancellation: CancellationToken,
}

impl ResumeRequest {
    pub fn new(
        tenant_id: Uuid,
        checkpoint_id: Uuid,
        answers: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            tenant_id,
            checkpoint_id,
            answers,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model produced a final answer.
    Completed {
        message: Message,
        usage: TokenUsage,
        iterations: u32,
        /// Provider continuity cursor of the last model call.
        provider_response_id: Option<String>,
    },
    /// The turn suspended on user-facing questions.
    AwaitingInput {
        checkpoint_id: Uuid,
        agent_name: String,
        questions: Vec<Question>,
    },
}

/// Runs turns for one agent against a model, a tool set, and stores.
pub struct Executor<C, R> {
    agent_name: String,
    system_prompt: String,
    model: Arc<BoxModel>,
    tool_index: HashMap<String, Arc<BoxTool>>,
    schemas: Vec<ToolSchema>,
    compiler: ContextCompiler,
    renderer: Arc<dyn Renderer>,
    summarizer: HistorySummarizer,
    checkpoints: Arc<C>,
    sessions: Arc<R>,
    bus: EventBus,
    locks: SessionLocks,
    max_iterations: u32,
    model_retries: u32,
}

impl<C, R> Executor<C, R>
where
    C: CheckpointStore,
    R: SessionRepository,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        model: Arc<BoxModel>,
        tools: Vec<Arc<BoxTool>>,
        estimator: Arc<dyn TokenEstimator>,
        renderer: Arc<dyn Renderer>,
        checkpoints: Arc<C>,
        sessions: Arc<R>,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        if config.agent_name.trim().is_empty() {
            return Err(ConfigError::Invalid("agent name cannot be empty".into()));
        }
        if config.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".into(),
            ));
        }

        let compiler = ContextCompiler::new(config.policy, estimator)?;
        let summarizer = HistorySummarizer::new(Arc::clone(&model));

        let schemas = tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();
        let tool_index = tools
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();

        Ok(Self {
            agent_name: config.agent_name,
            system_prompt: config.system_prompt,
            model,
            tool_index,
            schemas,
            compiler,
            renderer,
            summarizer,
            checkpoints,
            sessions,
            bus,
            locks: SessionLocks::new(),
            max_iterations: config.max_iterations,
            model_retries: config.model_retries,
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run one fresh turn. Fails fast with `SessionLocked` when another
    /// turn is already running for the session.
    #[instrument(name = "execute_turn", skip_all, fields(session_id = %request.session_id, agent = %self.agent_name))]
    pub async fn execute(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        let _guard = self.locks.acquire(request.session_id)?;
        let started = Instant::now();
        let caller = request.cancellation.clone();
        let token = Self::turn_token(&caller, request.deadline);
        let _stop = token.clone().drop_guard();

        let result = self.run_fresh(&request, &token, started).await;
        self.finish(
            result,
            &caller,
            request.session_id,
            request.tenant_id,
            started,
        )
    }

    /// Resume a suspended turn. The checkpoint is consumed exactly once;
    /// concurrent resumes of the same checkpoint have one winner and the
    /// rest fail with `CheckpointNotFound`.
    #[instrument(name = "resume_turn", skip_all, fields(checkpoint_id = %request.checkpoint_id, agent = %self.agent_name))]
    pub async fn resume(&self, request: ResumeRequest) -> Result<TurnOutcome, EngineError> {
        // Peek first: answers are validated and the session lock is taken
        // before the checkpoint is consumed, so a rejected resume leaves
        // the checkpoint intact and retryable.
        let peek = self
            .checkpoints
            .load(request.tenant_id, request.checkpoint_id)
            .await
            .map_err(map_checkpoint_err)?;
        let payload: QuestionPayload = serde_json::from_value(peek.interrupt_data.clone())
            .map_err(|e| EngineError::InvalidInterrupt(format!("checkpoint payload: {e}")))?;
        let answers = answers_payload(&payload, &request.answers)?;

        let _guard = self.locks.acquire(peek.session_id)?;
        let started = Instant::now();
        let caller = request.cancellation.clone();
        let token = Self::turn_token(&caller, request.deadline);
        let _stop = token.clone().drop_guard();

        let checkpoint = self
            .checkpoints
            .load_and_delete(request.tenant_id, request.checkpoint_id)
            .await
            .map_err(map_checkpoint_err)?;
        let session_id = checkpoint.session_id;
        let tenant_id = checkpoint.tenant_id;

        let result = self.run_resume(checkpoint, answers, &token, started).await;
        self.finish(result, &caller, session_id, tenant_id, started)
    }

    async fn run_fresh(
        &self,
        request: &TurnRequest,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<TurnOutcome, EngineError> {
        let mut session = match self
            .sessions
            .get_session(request.tenant_id, request.session_id)
            .await?
        {
            Some(session) => session,
            None => {
                let session =
                    Session::new(request.session_id, request.tenant_id, request.user_id);
                self.sessions.create_session(&session).await?;
                session
            }
        };

        let user_message = Message::user(request.session_id, &request.input);
        self.sessions
            .save_message(request.tenant_id, &user_message)
            .await?;
        let messages = self
            .sessions
            .get_session_messages(request.tenant_id, request.session_id)
            .await?;

        self.run_loop(
            &mut session,
            request.thread_id,
            messages,
            &request.working_blocks,
            token,
            false,
            started,
        )
        .await
    }

    async fn run_resume(
        &self,
        checkpoint: Checkpoint,
        answers: serde_json::Value,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<TurnOutcome, EngineError> {
        let mut session = self
            .sessions
            .get_session(checkpoint.tenant_id, checkpoint.session_id)
            .await?
            .ok_or(EngineError::SessionNotFound)?;

        let ask_call = checkpoint
            .pending_tools
            .iter()
            .find(|c| c.name == TOOL_ASK_USER)
            .ok_or_else(|| {
                EngineError::InvalidInterrupt("checkpoint has no pending ask_user call".into())
            })?;

        // The history continues from the snapshot plus exactly one
        // tool-result message carrying the answers.
        let answer_text = serde_json::to_string(&answers)
            .map_err(|e| EngineError::InvalidInterrupt(e.to_string()))?;
        let tool_message =
            Message::tool_response(checkpoint.session_id, &ask_call.id, answer_text);
        self.sessions
            .save_message(checkpoint.tenant_id, &tool_message)
            .await?;

        let mut messages = checkpoint.messages;
        messages.push(tool_message);

        session.pending_question_agent = None;
        session.provider_response_id = checkpoint.provider_response_id.clone();
        session.updated_at = Utc::now();
        self.sessions.update_session(&session).await?;

        self.run_loop(
            &mut session,
            checkpoint.thread_id,
            messages,
            &[],
            token,
            true,
            started,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        session: &mut Session,
        thread_id: Uuid,
        mut messages: Vec<Message>,
        working_blocks: &[ContextBlock],
        token: &CancellationToken,
        is_resume: bool,
        started: Instant,
    ) -> Result<TurnOutcome, EngineError> {
        let session_id = session.id;
        let tenant_id = session.tenant_id;
        self.bus.publish(EngineEvent::TurnStarted {
            session_id,
            tenant_id,
            agent_name: self.agent_name.clone(),
            is_resume,
        });

        let ctx = ToolContext::new(session_id, tenant_id, token.clone());
        let mut total_usage = TokenUsage::default();
        let mut provider_cursor = session.provider_response_id.clone();

        for iteration in 1..=self.max_iterations {
            let blocks = self.build_blocks(&messages, working_blocks);
            let compiled = self.compiler.compile(blocks, Some(&self.summarizer)).await?;
            if compiled.compacted() {
                self.bus.publish(EngineEvent::ContextCompacted {
                    session_id,
                    tenant_id,
                    summarized_blocks: compiled.compacted_blocks,
                });
            }
            let prompt = self.renderer.render(&compiled);

            let request = ModelRequest {
                system: prompt.system,
                messages: prompt.messages,
                tools: self.schemas.clone(),
                previous_response_id: provider_cursor.clone(),
            };

            self.bus.publish(EngineEvent::ModelCallStarted {
                session_id,
                tenant_id,
                model: self.model.info().name.clone(),
                message_count: request.messages.len(),
                tool_count: request.tools.len(),
            });
            let call_started = Instant::now();
            let response = self.call_model(&request, token).await?;
            total_usage.add(response.usage);
            if let Some(id) = &response.provider_response_id {
                provider_cursor = Some(id.clone());
            }
            self.bus.publish(EngineEvent::ModelCallCompleted {
                session_id,
                tenant_id,
                model: self.model.info().name.clone(),
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                tool_call_count: response.tool_calls.len(),
                duration_ms: call_started.elapsed().as_millis() as u64,
            });

            let assistant = Message::assistant_with_tool_calls(
                session_id,
                response.content.clone(),
                response.tool_calls.clone(),
            );
            self.sessions.save_message(tenant_id, &assistant).await?;
            messages.push(assistant.clone());

            if response.tool_calls.is_empty() {
                session.provider_response_id = provider_cursor.clone();
                session.pending_question_agent = None;
                session.updated_at = Utc::now();
                self.sessions.update_session(session).await?;

                self.bus.publish(EngineEvent::TurnCompleted {
                    session_id,
                    tenant_id,
                    agent_name: self.agent_name.clone(),
                    iterations: iteration,
                    input_tokens: total_usage.input_tokens,
                    output_tokens: total_usage.output_tokens,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                return Ok(TurnOutcome::Completed {
                    message: assistant,
                    usage: total_usage,
                    iterations: iteration,
                    provider_response_id: provider_cursor,
                });
            }

            match dispatch_tool_calls(&self.tool_index, &response.tool_calls, &ctx, &self.bus)
                .await?
            {
                DispatchOutcome::Interrupt { call: _, payload } => {
                    return self
                        .suspend(
                            session,
                            thread_id,
                            messages,
                            response.tool_calls,
                            payload,
                            provider_cursor,
                        )
                        .await;
                }
                DispatchOutcome::Fatal { name, error } => {
                    return Err(EngineError::ToolFailed {
                        name,
                        source: error,
                    });
                }
                DispatchOutcome::Results(results) => {
                    for result in &results {
                        self.sessions.save_message(tenant_id, result).await?;
                    }
                    messages.extend(results);
                }
            }
        }

        Err(EngineError::MaxIterations(self.max_iterations))
    }

    /// Persist the suspended turn. The checkpoint write comes first; if
    /// the session update then fails, the checkpoint is rolled back so no
    /// dangling suspension remains.
    async fn suspend(
        &self,
        session: &mut Session,
        thread_id: Uuid,
        messages: Vec<Message>,
        pending_tools: Vec<ToolCall>,
        payload: QuestionPayload,
        provider_cursor: Option<String>,
    ) -> Result<TurnOutcome, EngineError> {
        let interrupt_data = serde_json::to_value(&payload)
            .map_err(|e| EngineError::InvalidInterrupt(e.to_string()))?;
        let checkpoint = Checkpoint::new(
            session.tenant_id,
            session.id,
            thread_id,
            &self.agent_name,
            messages,
            pending_tools,
            InterruptKind::Question,
            interrupt_data,
            provider_cursor,
        );
        let checkpoint_id = self.checkpoints.save(&checkpoint).await?;

        session.pending_question_agent = Some(self.agent_name.clone());
        session.updated_at = Utc::now();
        if let Err(err) = self.sessions.update_session(session).await {
            if let Err(rollback) = self
                .checkpoints
                .delete(session.tenant_id, checkpoint_id)
                .await
            {
                warn!(error = %rollback, "checkpoint rollback failed after session update error");
            }
            return Err(err.into());
        }

        debug!(
            checkpoint_id = %checkpoint_id,
            questions = %describe_questions(&payload),
            "turn suspended on user input"
        );
        self.bus.publish(EngineEvent::InterruptRaised {
            session_id: session.id,
            tenant_id: session.tenant_id,
            checkpoint_id,
            agent_name: self.agent_name.clone(),
            question_count: payload.questions.len(),
        });

        Ok(TurnOutcome::AwaitingInput {
            checkpoint_id,
            agent_name: self.agent_name.clone(),
            questions: payload.questions,
        })
    }

    async fn call_model(
        &self,
        request: &ModelRequest,
        token: &CancellationToken,
    ) -> Result<ModelResponse, EngineError> {
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => return Err(EngineError::Cancelled),
                result = self.model.generate(request) => result,
            };
            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.model_retries => {
                    attempt += 1;
                    let backoff = match &err {
                        ModelError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => Duration::from_millis(*ms),
                        _ => Duration::from_millis(100 * u64::from(attempt)),
                    };
                    warn!(error = %err, attempt, "model call failed, retrying");
                    tokio::select! {
                        _ = token.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Map the persisted conversation plus per-turn extras into typed
    /// context blocks: agent instructions are pinned, the latest user
    /// message is the turn, tool results are tool output, the rest is
    /// history.
    fn build_blocks(
        &self,
        messages: &[Message],
        working_blocks: &[ContextBlock],
    ) -> Vec<ContextBlock> {
        let mut blocks = Vec::with_capacity(messages.len() + working_blocks.len() + 1);
        if !self.system_prompt.is_empty() {
            blocks.push(ContextBlock::text(
                BlockKind::Pinned,
                self.system_prompt.clone(),
            ));
        }
        blocks.extend(working_blocks.iter().cloned());

        let last_user = messages.iter().rposition(|m| m.role == MessageRole::User);
        for (i, message) in messages.iter().enumerate() {
            let kind = if Some(i) == last_user {
                BlockKind::Turn
            } else if message.role == MessageRole::Tool {
                BlockKind::ToolOutput
            } else {
                BlockKind::History
            };
            blocks.push(ContextBlock::from_message(kind, message.clone()));
        }
        blocks
    }

    /// Child token of the caller's token, cancelled additionally when the
    /// deadline elapses. The timer task exits early when the turn ends.
    fn turn_token(caller: &CancellationToken, deadline: Option<Duration>) -> CancellationToken {
        let token = caller.child_token();
        if let Some(deadline) = deadline {
            let timer = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => timer.cancel(),
                    _ = timer.cancelled() => {}
                }
            });
        }
        token
    }

    /// Classify cancellation against the caller's token and publish the
    /// failure event.
    fn finish(
        &self,
        result: Result<TurnOutcome, EngineError>,
        caller: &CancellationToken,
        session_id: Uuid,
        tenant_id: Uuid,
        started: Instant,
    ) -> Result<TurnOutcome, EngineError> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let err = match err {
                    EngineError::Cancelled if !caller.is_cancelled() => {
                        EngineError::DeadlineExceeded
                    }
                    other => other,
                };
                self.bus.publish(EngineEvent::TurnFailed {
                    session_id,
                    tenant_id,
                    agent_name: self.agent_name.clone(),
                    error: err.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Err(err)
            }
        }
    }
}

fn map_checkpoint_err(err: RepositoryError) -> EngineError {
    match err {
        RepositoryError::NotFound => EngineError::CheckpointNotFound,
        other => EngineError::Repository(other),
    }
}
