//! # CellPilot Core
//!
//! Domain types, traits, and error definitions for the CellPilot notebook agent.
//! This crate has **no runtime dependencies** beyond serialization and async
//! plumbing. It defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of a turn is defined as a trait here: the model runtime
//! ([`Provider`]), the tools ([`Tool`]), the checkpoint store
//! ([`CheckpointStore`]), the output channel ([`OutputChannel`]) and the
//! configuration ([`ConfigProvider`]). Implementations live in their
//! respective crates, which all depend inward on core.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod checkpoint;
pub mod output;
pub mod chat;
pub mod persona;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result, TurnError};
pub use message::{Message, MessageToolCall, Role, ThreadId, EMPTY_CONTENT_SENTINEL};
pub use provider::{Provider, ProviderFactory, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{Tool, ToolCall, ToolResult, ToolRegistry, ToolStatus, ToolTier};
pub use checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
pub use output::{FragmentStream, OutputChannel};
pub use chat::{Attachment, AttachmentKind, ChatMessage};
pub use persona::{ConfigProvider, PersonaDefaults};
