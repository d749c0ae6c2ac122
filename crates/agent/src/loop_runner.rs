//! The agent reasoning loop.
//!
//! One call to [`AgentLoop::run_turn`] runs one user turn as a small state
//! machine:
//!
//! ```text
//! Init -> Reasoning -> ToolDispatch -> Reasoning -> ... -> Emit -> Done
//! ```
//!
//! Content fragments are forwarded as the model produces them, and tool
//! progress notes are sent on the same stream, so the consumer sees both in
//! the order they happened. The thread's
//! checkpoint is committed after every completed Reasoning step that asks
//! for tools, after every ToolDispatch, and at Emit. A failed model call or a
//! cancelled turn never commits the cycle it was in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cellpilot_core::checkpoint::Checkpoint;
use cellpilot_core::error::TurnError;
use cellpilot_core::message::{Message, MessageToolCall, Role, ThreadId, is_empty_content};
use cellpilot_core::provider::{Provider, ProviderRequest, ToolDefinition, default_temperature};
use cellpilot_core::tool::ToolCall;
use cellpilot_memory::{CheckpointHandle, MemoryStore};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::delivery::{TurnEvent, TurnStream};
use crate::middleware::{ToolNotifier, ToolPipeline};

/// Events buffered between the loop and a slow consumer.
const EVENT_BUFFER: usize = 64;

/// Tool output recorded for calls a previous turn never finished.
const INTERRUPTED_TOOL_CALL: &str = "Tool call was interrupted before it returned a result.";

type EventSender = mpsc::Sender<Result<TurnEvent, TurnError>>;

/// Puts tool progress notes on the turn's own stream.
struct TurnNotifier<'a> {
    tx: &'a EventSender,
}

#[async_trait]
impl ToolNotifier for TurnNotifier<'_> {
    async fn notify(&self, text: String) {
        if self.tx.send(Ok(TurnEvent::Notice(text))).await.is_err() {
            debug!("Tool note dropped, turn consumer is gone");
        }
    }
}

#[derive(Debug)]
enum TurnState {
    Init { user_message: String },
    Reasoning { iteration: u32 },
    ToolDispatch { iteration: u32, calls: Vec<MessageToolCall> },
    Emit { iteration: u32, message: Message },
    Done { iterations: u32 },
}

impl TurnState {
    fn label(&self) -> &'static str {
        match self {
            TurnState::Init { .. } => "init",
            TurnState::Reasoning { .. } => "reasoning",
            TurnState::ToolDispatch { .. } => "tool_dispatch",
            TurnState::Emit { .. } => "emit",
            TurnState::Done { .. } => "done",
        }
    }
}

/// Wires a model, a tool pipeline and the memory store into one reasoning loop.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,

    /// Model id sent with every request
    model: String,

    system_prompt: String,

    pipeline: Arc<ToolPipeline>,

    memory: Arc<MemoryStore>,

    temperature: f32,

    max_tokens: Option<u32>,

    /// Reasoning steps allowed per turn
    max_iterations: u32,

    turn_timeout: Option<Duration>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        pipeline: Arc<ToolPipeline>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: system_prompt.into(),
            pipeline,
            memory,
            temperature: default_temperature(),
            max_tokens: None,
            max_iterations: 25,
            turn_timeout: None,
        }
    }

    /// Set the maximum number of reasoning steps per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Abort the turn with [`TurnError::Timeout`] once `timeout` has elapsed.
    pub fn with_turn_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Run one turn for `thread_id`.
    ///
    /// Returns immediately. The turn runs in a background task that feeds
    /// the returned stream; an error ends the stream as its last item.
    /// Dropping the stream cancels the turn.
    pub fn run_turn(&self, thread_id: &ThreadId, user_message: impl Into<String>) -> TurnStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        let thread_id = thread_id.clone();
        let user_message = user_message.into();

        tokio::spawn(async move {
            let started = Instant::now();
            let run = this.drive(&thread_id, user_message, &tx);
            let outcome = match this.turn_timeout {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .unwrap_or(Err(TurnError::Timeout {
                        secs: limit.as_secs(),
                    })),
                None => run.await,
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(iterations) => {
                    info!(thread_id = %thread_id, iterations, elapsed_ms, "Turn completed");
                }
                Err(TurnError::Cancelled) => {
                    warn!(thread_id = %thread_id, elapsed_ms, "Turn cancelled by consumer");
                }
                Err(e) => {
                    warn!(thread_id = %thread_id, elapsed_ms, error = %e, "Turn failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive(
        &self,
        thread_id: &ThreadId,
        user_message: String,
        tx: &EventSender,
    ) -> Result<u32, TurnError> {
        if tx.is_closed() {
            return Err(TurnError::Cancelled);
        }
        let handle = self.memory.get_or_create(thread_id).await?;
        let mut checkpoint = handle.load().await?;
        let definitions = self.pipeline.definitions();

        info!(
            thread_id = %thread_id,
            history = checkpoint.messages.len(),
            version = checkpoint.version,
            tools = definitions.len(),
            "Turn started"
        );

        let mut state = TurnState::Init { user_message };
        loop {
            debug!(thread_id = %thread_id, state = state.label(), "Turn state");
            state = match state {
                TurnState::Init { user_message } => {
                    close_dangling_tool_calls(&mut checkpoint);
                    checkpoint.push(Message::user(user_message));
                    TurnState::Reasoning { iteration: 1 }
                }

                TurnState::Reasoning { iteration } => {
                    if iteration > self.max_iterations {
                        warn!(
                            thread_id = %thread_id,
                            limit = self.max_iterations,
                            "Reasoning loop hit its iteration limit"
                        );
                        return Err(TurnError::IterationLimit {
                            limit: self.max_iterations,
                        });
                    }

                    let (content, calls) = self.reason(&checkpoint, &definitions, iteration, tx).await?;
                    if calls.is_empty() {
                        TurnState::Emit {
                            iteration,
                            message: Message::assistant(content),
                        }
                    } else {
                        checkpoint.push(Message::assistant_tool_calls(content, calls.clone()));
                        checkpoint = commit(&handle, &checkpoint).await?;
                        TurnState::ToolDispatch { iteration, calls }
                    }
                }

                TurnState::ToolDispatch { iteration, calls } => {
                    let notifier = TurnNotifier { tx };
                    for tc in &calls {
                        if tx.is_closed() {
                            return Err(TurnError::Cancelled);
                        }
                        let call = ToolCall {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            arguments: parse_arguments(tc),
                        };
                        let result = self.pipeline.dispatch(&call, &notifier).await;
                        checkpoint.push(if result.is_error() {
                            Message::tool_error(&tc.id, result.output)
                        } else {
                            Message::tool_result(&tc.id, result.output)
                        });
                    }
                    checkpoint = commit(&handle, &checkpoint).await?;
                    TurnState::Reasoning {
                        iteration: iteration + 1,
                    }
                }

                TurnState::Emit { iteration, message } => {
                    checkpoint.push(message);
                    checkpoint = commit(&handle, &checkpoint).await?;
                    TurnState::Done {
                        iterations: iteration,
                    }
                }

                TurnState::Done { iterations } => return Ok(iterations),
            };
        }
    }

    /// One model call. Forwards content as it streams in and collects tool calls.
    async fn reason(
        &self,
        checkpoint: &Checkpoint,
        definitions: &[ToolDefinition],
        iteration: u32,
        tx: &EventSender,
    ) -> Result<(String, Vec<MessageToolCall>), TurnError> {
        let mut messages = Vec::with_capacity(checkpoint.messages.len() + 1);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(checkpoint.messages.iter().cloned());

        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: definitions.to_vec(),
            stream: true,
        };

        debug!(
            iteration,
            messages = request.messages.len(),
            provider = self.provider.name(),
            "Invoking model"
        );
        let mut chunks = self.provider.stream(request).await?;

        let mut content = String::new();
        let mut calls: Vec<MessageToolCall> = Vec::new();
        while let Some(chunk) = chunks.recv().await {
            let chunk = chunk?;

            if let Some(text) = chunk.content
                && !is_empty_content(&text)
            {
                content.push_str(&text);
                if tx.send(Ok(TurnEvent::Fragment(text))).await.is_err() {
                    return Err(TurnError::Cancelled);
                }
            }

            for tc in chunk.tool_calls {
                if let Some(existing) = calls.iter_mut().find(|c| !tc.id.is_empty() && c.id == tc.id) {
                    existing.arguments.push_str(&tc.arguments);
                } else {
                    let id = if tc.id.is_empty() {
                        format!("call_{}", calls.len())
                    } else {
                        tc.id
                    };
                    calls.push(MessageToolCall { id, ..tc });
                }
            }
        }

        debug!(iteration, content_len = content.len(), tool_calls = calls.len(), "Model step finished");
        Ok((content, calls))
    }
}

async fn commit(handle: &CheckpointHandle, checkpoint: &Checkpoint) -> Result<Checkpoint, TurnError> {
    let committed = handle.commit(checkpoint).await?;
    debug!(
        thread_id = %committed.thread_id,
        version = committed.version,
        messages = committed.messages.len(),
        "Checkpoint committed"
    );
    Ok(committed)
}

/// Tool arguments arrive as JSON text. Empty or malformed text becomes `{}`.
fn parse_arguments(tc: &MessageToolCall) -> serde_json::Value {
    if tc.arguments.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(&tc.arguments).unwrap_or_else(|e| {
        warn!(tool = %tc.name, error = %e, "Tool arguments are not valid JSON");
        serde_json::json!({})
    })
}

/// Give every tool call left unanswered by an interrupted turn an error result,
/// so the history stays well-formed for the model.
fn close_dangling_tool_calls(checkpoint: &mut Checkpoint) {
    let Some(last_request) = checkpoint
        .messages
        .iter()
        .rposition(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
    else {
        return;
    };

    let answered: Vec<String> = checkpoint.messages[last_request + 1..]
        .iter()
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    let missing: Vec<String> = checkpoint.messages[last_request]
        .tool_calls
        .iter()
        .filter(|tc| !answered.contains(&tc.id))
        .map(|tc| tc.id.clone())
        .collect();

    for id in missing {
        debug!(call_id = %id, "Closing interrupted tool call");
        checkpoint.push(Message::tool_error(id, INTERRUPTED_TOOL_CALL));
    }
}
