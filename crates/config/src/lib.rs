//! Configuration loading, validation, and management for CellPilot.
//!
//! Loads configuration from `~/.cellpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use cellpilot_core::persona::{ConfigProvider, PersonaDefaults, DEFAULT_AVATAR_PATH, DEFAULT_PERSONA_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cellpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The selected chat model (e.g. "gpt-4o-mini"). No model, no turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,

    /// Extra arguments for the model runtime (api_base, api_key, temperature, max_tokens)
    #[serde(default)]
    pub chat_model_args: serde_json::Map<String, serde_json::Value>,

    /// Persona identity
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Checkpoint storage
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Reasoning loop bounds
    #[serde(default)]
    pub agent: AgentSettings,

    /// Which tools the persona gets
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Keys in `chat_model_args` whose values never show up in Debug output.
const SECRET_ARG_KEYS: &[&str] = &["api_key", "token"];

fn redacted_args(
    args: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    args.iter()
        .map(|(k, v)| {
            if SECRET_ARG_KEYS.contains(&k.as_str()) {
                (k.clone(), serde_json::Value::String("[REDACTED]".into()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("chat_model", &self.chat_model)
            .field("chat_model_args", &redacted_args(&self.chat_model_args))
            .field("persona", &self.persona)
            .field("memory", &self.memory)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,

    #[serde(default = "default_avatar_path")]
    pub avatar_path: String,

    #[serde(default = "default_persona_description")]
    pub description: String,

    /// Replaces the built-in system prompt template when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_persona_name() -> String {
    DEFAULT_PERSONA_NAME.into()
}
fn default_avatar_path() -> String {
    DEFAULT_AVATAR_PATH.into()
}
fn default_persona_description() -> String {
    PersonaDefaults::default().description
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            avatar_path: default_avatar_path(),
            description: default_persona_description(),
            system_prompt: None,
        }
    }
}

impl PersonaConfig {
    pub fn to_defaults(&self) -> PersonaDefaults {
        PersonaDefaults {
            name: self.name.clone(),
            avatar_path: self.avatar_path.clone(),
            description: self.description.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// The checkpoint database file (one per installation)
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,

    /// How long a writer waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_memory_path() -> PathBuf {
    data_dir().join("cellpilot").join("memory.sqlite")
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Upper bound on reasoning cycles per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock limit for one turn; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,

    /// How much tool output the progress notification shows
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_preview_chars() -> usize {
    100
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            turn_timeout_secs: None,
            preview_chars: default_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Sandbox root for every file-touching tool; the working directory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub notebook: bool,

    #[serde(default = "default_true")]
    pub search: bool,

    #[serde(default = "default_true")]
    pub shell: bool,

    #[serde(default = "default_true")]
    pub workspace_commands: bool,

    /// Allowed shell programs (first word of the command). Empty allows all.
    #[serde(default)]
    pub shell_allowlist: Vec<String>,

    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,
}

fn default_true() -> bool {
    true
}
fn default_shell_timeout_secs() -> u64 {
    60
}
fn default_search_max_results() -> usize {
    100
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            notebook: true,
            search: true,
            shell: true,
            workspace_commands: true,
            shell_allowlist: vec![],
            shell_timeout_secs: default_shell_timeout_secs(),
            search_max_results: default_search_max_results(),
        }
    }
}

impl ToolsConfig {
    /// The effective sandbox root.
    pub fn root(&self) -> PathBuf {
        match &self.root_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.cellpilot/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CELLPILOT_CHAT_MODEL`
    /// - `CELLPILOT_API_KEY` (then `OPENAI_API_KEY`), unless the file sets one
    /// - `CELLPILOT_ROOT_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("CELLPILOT_CHAT_MODEL").filter(|m| !m.is_empty()) {
            self.chat_model = Some(model);
        }

        if !self.chat_model_args.contains_key("api_key") {
            if let Some(key) = lookup("CELLPILOT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
                self.chat_model_args
                    .insert("api_key".into(), serde_json::Value::String(key));
            }
        }

        if let Some(root) = lookup("CELLPILOT_ROOT_DIR") {
            self.tools.root_dir = Some(PathBuf::from(root));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cellpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.preview_chars == 0 {
            return Err(ConfigError::ValidationError(
                "agent.preview_chars must be at least 1".into(),
            ));
        }

        if self.agent.turn_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "agent.turn_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.tools.shell_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.shell_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(temperature) = self.chat_model_args.get("temperature") {
            match temperature.as_f64() {
                Some(t) if (0.0..=2.0).contains(&t) => {}
                _ => {
                    return Err(ConfigError::ValidationError(
                        "chat_model_args.temperature must be a number between 0.0 and 2.0".into(),
                    ));
                }
            }
        }

        if matches!(&self.chat_model, Some(m) if m.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "chat_model must not be blank".into(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML, with secrets redacted.
    pub fn to_redacted_toml(&self) -> String {
        let mut shown = self.clone();
        shown.chat_model_args = redacted_args(&self.chat_model_args);
        toml::to_string_pretty(&shown).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chat_model: None,
            chat_model_args: serde_json::Map::new(),
            persona: PersonaConfig::default(),
            memory: MemoryConfig::default(),
            agent: AgentSettings::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl ConfigProvider for AppConfig {
    fn chat_model(&self) -> Option<String> {
        self.chat_model.clone()
    }

    fn chat_model_args(&self) -> serde_json::Map<String, serde_json::Value> {
        self.chat_model_args.clone()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// The per-user data directory (`$XDG_DATA_HOME`, else `~/.local/share`).
fn data_dir() -> PathBuf {
    match std::env::var("XDG_DATA_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs_home().join(".local").join("share"),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
