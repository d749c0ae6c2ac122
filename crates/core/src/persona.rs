//! Persona identity and the read-only configuration provider it consults.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSONA_NAME: &str = "Jupyternaut";
pub const DEFAULT_AVATAR_PATH: &str = "/api/cellpilot/static/jupyternaut.svg";

/// How a persona presents itself in the chat room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDefaults {
    pub name: String,
    pub avatar_path: String,
    pub description: String,

    /// Optional override of the built-in system prompt template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for PersonaDefaults {
    fn default() -> Self {
        Self {
            name: DEFAULT_PERSONA_NAME.into(),
            avatar_path: DEFAULT_AVATAR_PATH.into(),
            description: "The standard agent provided by CellPilot.".into(),
            system_prompt: None,
        }
    }
}

/// Source of the chat model selection. Only ever read.
pub trait ConfigProvider: Send + Sync {
    /// The selected chat model identifier, if any.
    fn chat_model(&self) -> Option<String>;

    /// Extra arguments passed to the model runtime.
    fn chat_model_args(&self) -> serde_json::Map<String, serde_json::Value>;
}
