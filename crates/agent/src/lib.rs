//! The conversational turn pipeline for CellPilot.
//!
//! A [`Persona`] receives a chat message and runs one turn:
//!
//! 1. **Check** the session: configuration, selected model, memory store
//! 2. **Assemble** the system prompt from the persona, model and attachments
//! 3. **Reason** with the model, streaming its text to the output channel
//! 4. **Act** on tool calls through the middleware chain, then reason again;
//!    progress notes travel on the same ordered stream as the reply
//! 5. **Commit** each completed step to the thread's checkpoint
//!
//! The loop ends when the model answers without tool calls, or when the
//! iteration limit or turn timeout is hit.

pub mod delivery;
pub mod loop_runner;
pub mod middleware;
pub mod persona;
pub mod prompt;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use delivery::{TurnEvent, TurnStream, deliver_turn};
pub use loop_runner::AgentLoop;
pub use middleware::{
    Next, ToolLoggingMiddleware, ToolMiddleware, ToolMonitoringMiddleware, ToolNotifier,
    ToolPipeline,
};
pub use persona::{
    CONFIGURATION_GUIDANCE, Persona, SessionState, installation_guidance, storage_error_message,
};
pub use prompt::{
    AttachmentProcessor, DEFAULT_SYSTEM_PROMPT_TEMPLATE, FileAttachmentProcessor, PromptAssembler,
    PromptTemplate, SystemPromptArgs,
};
