//! LLM provider implementations for CellPilot.
//!
//! All providers implement the `cellpilot_core::Provider` trait. The factory
//! builds one from the configured chat model on every turn.

pub mod factory;
pub mod openai_compat;

pub use factory::{resolve_model, OpenAiCompatFactory};
pub use openai_compat::OpenAiCompatProvider;
