//! Tool-call interception.
//!
//! Every tool call the model makes passes through an ordered chain of
//! [`ToolMiddleware`] before it reaches the registry. The first middleware in
//! the chain is the outermost. [`ToolPipeline::dispatch`] never fails: an
//! error that escapes the whole chain becomes an error-tagged tool result so
//! the reasoning loop can hand it back to the model.
//!
//! Progress notes go to the [`ToolNotifier`] handed to each dispatch, so a
//! turn can keep them in line with its own reply fragments.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cellpilot_core::error::ToolError;
use cellpilot_core::message::is_empty_content;
use cellpilot_core::provider::ToolDefinition;
use cellpilot_core::tool::{ToolCall, ToolRegistry, ToolResult};
use tracing::{debug, warn};

/// Receives tool progress notes for one dispatch.
#[async_trait]
pub trait ToolNotifier: Send + Sync {
    async fn notify(&self, text: String);
}

/// A wrapper around every tool invocation.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    fn name(&self) -> &str;

    /// Handle `call`, usually by delegating to `next` somewhere in between.
    async fn wrap_tool_call(&self, call: &ToolCall, next: Next<'_>) -> Result<ToolResult, ToolError>;
}

/// The rest of the chain, ending at the registry.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn ToolMiddleware>],
    registry: &'a ToolRegistry,
    notifier: &'a dyn ToolNotifier,
}

impl<'a> Next<'a> {
    /// Where progress notes for this call belong.
    pub fn notifier(&self) -> &'a dyn ToolNotifier {
        self.notifier
    }

    pub async fn run(self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        match self.middleware.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    middleware: rest,
                    registry: self.registry,
                    notifier: self.notifier,
                };
                head.wrap_tool_call(call, next).await
            }
            None => self.registry.execute(call).await,
        }
    }
}

/// A tool registry plus the middleware chain in front of it.
///
/// Built once per persona session and shared across turns.
pub struct ToolPipeline {
    registry: Arc<ToolRegistry>,
    middleware: Vec<Arc<dyn ToolMiddleware>>,
}

impl ToolPipeline {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            middleware: Vec::new(),
        }
    }

    /// Append a middleware. Earlier ones wrap later ones.
    pub fn with_middleware(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Run one tool call through the chain, reporting progress to `notifier`.
    pub async fn dispatch(&self, call: &ToolCall, notifier: &dyn ToolNotifier) -> ToolResult {
        let next = Next {
            middleware: &self.middleware,
            registry: &self.registry,
            notifier,
        };
        match next.run(call).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool error escaped middleware");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }
}

/// Surfaces tool progress in the chat and turns tool errors into results.
///
/// Emits `Running **name** with *args*` before the call, then either a
/// preview of the output (or `Done!`) or `**name** failed: message`.
#[derive(Debug)]
pub struct ToolMonitoringMiddleware {
    preview_chars: usize,
}

impl Default for ToolMonitoringMiddleware {
    fn default() -> Self {
        Self { preview_chars: 100 }
    }
}

impl ToolMonitoringMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }
}

#[async_trait]
impl ToolMiddleware for ToolMonitoringMiddleware {
    fn name(&self) -> &str {
        "tool_monitoring"
    }

    async fn wrap_tool_call(&self, call: &ToolCall, next: Next<'_>) -> Result<ToolResult, ToolError> {
        let notifier = next.notifier();
        notifier
            .notify(format!("Running **{}** with *{}*", call.name, call.arguments))
            .await;

        match next.run(call).await {
            Ok(result) => {
                let completed = if is_empty_content(&result.output) {
                    "Done!".to_string()
                } else {
                    result.output.chars().take(self.preview_chars).collect()
                };
                notifier.notify(completed).await;
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                notifier.notify(format!("**{}** failed: {message}", call.name)).await;
                Ok(ToolResult::error(&call.id, message))
            }
        }
    }
}

/// Debug-logs every call with its duration.
#[derive(Debug, Default)]
pub struct ToolLoggingMiddleware;

#[async_trait]
impl ToolMiddleware for ToolLoggingMiddleware {
    fn name(&self) -> &str {
        "tool_logging"
    }

    async fn wrap_tool_call(&self, call: &ToolCall, next: Next<'_>) -> Result<ToolResult, ToolError> {
        debug!(tool = %call.name, call_id = %call.id, "Tool call started");
        let start = Instant::now();
        let outcome = next.run(call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => debug!(
                tool = %call.name,
                duration_ms,
                is_error = result.is_error(),
                output_len = result.output.len(),
                "Tool call finished"
            ),
            Err(e) => warn!(tool = %call.name, duration_ms, error = %e, "Tool call failed"),
        }
        outcome
    }
}
