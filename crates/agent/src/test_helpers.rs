//! Shared test helpers: scripted streaming provider, factories and tools.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use cellpilot_core::error::{ProviderError, ToolError};
use cellpilot_core::message::{Message, MessageToolCall};
use cellpilot_core::provider::{
    ChunkReceiver, Provider, ProviderFactory, ProviderRequest, ProviderResponse, StreamChunk,
};
use cellpilot_core::tool::{Tool, ToolResult, ToolTier};
use serde_json::{Map, Value};

use crate::middleware::ToolNotifier;

/// One scripted model call.
#[derive(Clone)]
pub enum Script {
    /// Stream these chunks, then end normally.
    Chunks(Vec<StreamChunk>),
    /// Stream these chunks, then fail mid-stream.
    FailAfter(Vec<StreamChunk>, ProviderError),
    /// Fail before streaming anything.
    Fail(ProviderError),
}

impl Script {
    /// A plain answer split into fragments.
    pub fn text(fragments: &[&str]) -> Self {
        Script::Chunks(fragments.iter().map(|f| StreamChunk::text(*f)).collect())
    }

    /// A batch of tool calls, optionally preceded by some thought text.
    pub fn tool_calls(thought: &str, calls: Vec<MessageToolCall>) -> Self {
        let mut chunks = Vec::new();
        if !thought.is_empty() {
            chunks.push(StreamChunk::text(thought));
        }
        chunks.push(StreamChunk::tool_calls(calls));
        Script::Chunks(chunks)
    }
}

/// A streaming provider that replays scripted calls in order and records
/// every request it receives.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self, request: ProviderRequest) -> Script {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            Script::Fail(ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted at call #{count}"),
            })
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let chunks = match self.next_script(request) {
            Script::Chunks(chunks) => chunks,
            Script::FailAfter(_, e) | Script::Fail(e) => return Err(e),
        };
        let content: String = chunks.iter().filter_map(|c| c.content.clone()).collect();
        let tool_calls: Vec<MessageToolCall> =
            chunks.into_iter().flat_map(|c| c.tool_calls).collect();
        Ok(ProviderResponse {
            message: Message::assistant_tool_calls(content, tool_calls),
            usage: None,
            model: "scripted-model".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (chunks, failure) = match self.next_script(request) {
            Script::Chunks(chunks) => (chunks, None),
            Script::FailAfter(chunks, e) => (chunks, Some(e)),
            Script::Fail(e) => return Err(e),
        };
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len() + 1);
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
        if let Some(e) = failure {
            let _ = tx.send(Err(e)).await;
        }
        Ok(rx)
    }
}

/// Hands out one shared provider and counts how often it was asked to.
pub struct CountingFactory {
    provider: Arc<dyn Provider>,
    created: AtomicUsize,
    seen_models: Mutex<Vec<String>>,
}

impl CountingFactory {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            created: AtomicUsize::new(0),
            seen_models: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn seen_models(&self) -> Vec<String> {
        self.seen_models.lock().unwrap().clone()
    }
}

impl ProviderFactory for CountingFactory {
    fn create(
        &self,
        model_id: &str,
        _model_args: &Map<String, Value>,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.seen_models.lock().unwrap().push(model_id.to_string());
        Ok(self.provider.clone())
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(id: &str, name: &str, args: Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the text argument"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    fn tier(&self) -> ToolTier {
        ToolTier::Structured
    }
    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        Ok(ToolResult::success(text))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Succeeds with the empty-content sentinel as output.
pub struct NullTool;

#[async_trait]
impl Tool for NullTool {
    fn name(&self) -> &str {
        "null_tool"
    }
    fn description(&self) -> &str {
        "Succeeds without output"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::success("null"))
    }
}

/// Records every tool progress note it is given.
#[derive(Default)]
pub struct NoteLog {
    notes: Mutex<Vec<String>>,
}

impl NoteLog {
    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolNotifier for NoteLog {
    async fn notify(&self, text: String) {
        self.notes.lock().unwrap().push(text);
    }
}
