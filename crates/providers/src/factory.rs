//! Provider factory — turns the configured chat model into a provider.
//!
//! Model ids may carry a routing prefix (`openai/gpt-4o`, `ollama/llama3.1`,
//! `openrouter/anthropic/claude-sonnet-4`). The prefix selects a default
//! endpoint; `chat_model_args.api_base` always wins over it.

use std::sync::Arc;

use cellpilot_core::error::ProviderError;
use cellpilot_core::provider::{Provider, ProviderFactory};
use serde_json::{Map, Value};
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Where a model id routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider: String,
    pub base_url: String,
    /// Model name sent upstream
    pub model: String,
}

/// Resolve a model id like "ollama/llama3.1" to provider, endpoint and upstream name.
pub fn resolve_model(model_id: &str) -> ResolvedModel {
    let routes: [(&str, &str); 3] = [
        ("openai", OPENAI_BASE_URL),
        ("openrouter", OPENROUTER_BASE_URL),
        ("ollama", OLLAMA_BASE_URL),
    ];
    for (prefix, base_url) in routes {
        if let Some(rest) = model_id.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
            return ResolvedModel {
                provider: prefix.to_string(),
                base_url: base_url.to_string(),
                model: rest.to_string(),
            };
        }
    }
    ResolvedModel {
        provider: "openai".into(),
        base_url: OPENAI_BASE_URL.into(),
        model: model_id.to_string(),
    }
}

/// Builds [`OpenAiCompatProvider`]s from `chat_model` + `chat_model_args`.
///
/// Recognised args: `api_base`, `api_key`, `temperature`, `max_tokens`.
/// Anything else is ignored.
#[derive(Debug, Default, Clone)]
pub struct OpenAiCompatFactory;

impl OpenAiCompatFactory {
    pub fn new() -> Self {
        Self
    }
}

fn string_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl ProviderFactory for OpenAiCompatFactory {
    fn create(
        &self,
        model_id: &str,
        model_args: &Map<String, Value>,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        if model_id.trim().is_empty() {
            return Err(ProviderError::NotConfigured("empty chat model id".into()));
        }

        let resolved = resolve_model(model_id);
        let base_url = string_arg(model_args, "api_base").unwrap_or(resolved.base_url.as_str());
        let api_key = string_arg(model_args, "api_key").unwrap_or_default();

        let mut provider = OpenAiCompatProvider::new(&resolved.provider, base_url, api_key)?
            .with_model(&resolved.model);

        if let Some(t) = model_args.get("temperature").and_then(Value::as_f64) {
            provider = provider.with_temperature(t as f32);
        }
        if let Some(max) = model_args.get("max_tokens").and_then(Value::as_u64) {
            let max = u32::try_from(max)
                .map_err(|_| ProviderError::NotConfigured(format!("max_tokens {max} out of range")))?;
            provider = provider.with_max_tokens(max);
        }

        debug!(
            provider = %resolved.provider,
            model = %resolved.model,
            base_url = %provider.base_url(),
            "Created chat model provider"
        );
        Ok(Arc::new(provider))
    }
}
