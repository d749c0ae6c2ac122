//! The turn controller: what happens when a chat message arrives.
//!
//! A [`Persona`] checks its session state, builds the system prompt, wires a
//! fresh [`AgentLoop`] for the configured model and streams the turn to the
//! output channel. Guidance and storage messages are sent once per failing
//! turn; nothing is latched, so the next message simply tries again.

use std::sync::Arc;
use std::time::Duration;

use cellpilot_config::{AgentSettings, AppConfig, ToolsConfig};
use cellpilot_core::chat::ChatMessage;
use cellpilot_core::error::{ToolError, TurnError};
use cellpilot_core::output::OutputChannel;
use cellpilot_core::persona::{ConfigProvider, PersonaDefaults};
use cellpilot_core::provider::ProviderFactory;
use cellpilot_core::tool::ToolRegistry;
use cellpilot_memory::MemoryStore;
use cellpilot_tools::{CommandExecutor, Sandbox, build_registry};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::delivery::deliver_turn;
use crate::loop_runner::AgentLoop;
use crate::middleware::{ToolLoggingMiddleware, ToolMonitoringMiddleware, ToolPipeline};
use crate::prompt::{AttachmentProcessor, FileAttachmentProcessor, PromptAssembler, PromptTemplate};

/// Sent when there is no configuration provider at all.
pub fn installation_guidance(persona_name: &str) -> String {
    format!(
        "{persona_name} requires the CellPilot configuration provider.\n\n\
         Please make sure CellPilot is installed in your environment with a readable \
         configuration & restart the server."
    )
}

/// Sent when no chat model is selected.
pub const CONFIGURATION_GUIDANCE: &str = "No chat model is configured.\n\n\
You must set one first, with `chat_model` in `~/.cellpilot/config.toml` or the \
`CELLPILOT_CHAT_MODEL` environment variable.";

/// Sent when the conversation store cannot be opened.
pub fn storage_error_message(error: &TurnError) -> String {
    format!("Conversation memory is unavailable, so this message was not processed.\n\n{error}")
}

type RegistryBuilder = Box<dyn Fn() -> Result<ToolRegistry, ToolError> + Send + Sync>;

/// What a persona may use, each present or not.
#[derive(Clone, Default)]
pub struct SessionState {
    pub config: Option<Arc<dyn ConfigProvider>>,
    pub memory: Option<Arc<MemoryStore>>,
}

impl SessionState {
    pub fn new(config: Arc<dyn ConfigProvider>, memory: Arc<MemoryStore>) -> Self {
        Self {
            config: Some(config),
            memory: Some(memory),
        }
    }
}

/// The chat persona that handles one message at a time per thread.
pub struct Persona {
    defaults: PersonaDefaults,
    session: SessionState,
    output: Arc<dyn OutputChannel>,
    factory: Arc<dyn ProviderFactory>,
    assembler: PromptAssembler,
    settings: AgentSettings,
    registry_builder: RegistryBuilder,
    /// Tools and middleware, built on the first turn that needs them
    pipeline: OnceCell<Arc<ToolPipeline>>,
}

impl Persona {
    pub fn new(
        defaults: PersonaDefaults,
        session: SessionState,
        output: Arc<dyn OutputChannel>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let template = match &defaults.system_prompt {
            Some(custom) => PromptTemplate::new(custom.clone()),
            None => PromptTemplate::default(),
        };
        Self {
            defaults,
            session,
            output,
            factory,
            assembler: PromptAssembler::new(template),
            settings: AgentSettings::default(),
            registry_builder: Box::new(|| Ok(ToolRegistry::new())),
            pipeline: OnceCell::new(),
        }
    }

    /// A persona wired from the application config: identity, loop bounds,
    /// tool groups and attachment reading all come from `config`.
    pub fn from_app_config(
        config: Arc<AppConfig>,
        memory: Arc<MemoryStore>,
        output: Arc<dyn OutputChannel>,
        factory: Arc<dyn ProviderFactory>,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        let mut persona = Self::new(
            config.persona.to_defaults(),
            SessionState::new(config.clone(), memory),
            output,
            factory,
        )
        .with_agent_settings(config.agent.clone())
        .with_tools(config.tools.clone(), executor);

        match Sandbox::new(config.tools.root()) {
            Ok(sandbox) => {
                persona = persona.with_attachment_processor(Arc::new(FileAttachmentProcessor::new(sandbox)));
            }
            Err(e) => warn!(error = %e, "Attachments disabled: workspace root is not usable"),
        }
        persona
    }

    pub fn with_agent_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Assemble tools from `config` on the first turn.
    pub fn with_tools(mut self, config: ToolsConfig, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        self.registry_builder = Box::new(move || build_registry(&config, executor.clone()));
        self
    }

    /// Assemble tools with `builder` on the first turn.
    pub fn with_registry_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn() -> Result<ToolRegistry, ToolError> + Send + Sync + 'static,
    {
        self.registry_builder = Box::new(builder);
        self
    }

    pub fn with_attachment_processor(mut self, processor: Arc<dyn AttachmentProcessor>) -> Self {
        self.assembler = self.assembler.with_attachment_processor(processor);
        self
    }

    pub fn defaults(&self) -> &PersonaDefaults {
        &self.defaults
    }

    pub fn name(&self) -> &str {
        &self.defaults.name
    }

    async fn pipeline(&self) -> Result<Arc<ToolPipeline>, ToolError> {
        self.pipeline
            .get_or_try_init(|| async {
                let registry = (self.registry_builder)()?;
                let monitoring = ToolMonitoringMiddleware::new().with_preview_chars(self.settings.preview_chars);
                let pipeline = ToolPipeline::new(Arc::new(registry))
                    .with_middleware(Arc::new(monitoring))
                    .with_middleware(Arc::new(ToolLoggingMiddleware));
                info!(
                    persona = %self.defaults.name,
                    tools = ?pipeline.registry().names(),
                    "Tool pipeline ready"
                );
                Ok(Arc::new(pipeline))
            })
            .await
            .cloned()
    }

    /// Handle one incoming message.
    ///
    /// Every failure is also reported to the output channel before it is
    /// returned, so hosts may treat the error as already shown.
    pub async fn on_message(&self, message: &ChatMessage) -> Result<(), TurnError> {
        let Some(config) = &self.session.config else {
            self.output.send(installation_guidance(&self.defaults.name)).await;
            return Err(TurnError::ConfigurationMissing("no configuration provider".into()));
        };

        let Some(model_id) = config.chat_model().filter(|m| !m.trim().is_empty()) else {
            self.output.send(CONFIGURATION_GUIDANCE.to_string()).await;
            return Err(TurnError::ConfigurationMissing("no chat model selected".into()));
        };
        let model_args = config.chat_model_args();

        let thread_id = message.thread_id();
        let memory = match &self.session.memory {
            Some(memory) => memory,
            None => {
                let err = TurnError::StorageUnavailable("no memory store in this session".into());
                self.output.send(storage_error_message(&err)).await;
                return Err(err);
            }
        };
        if let Err(e) = memory.get_or_create(&thread_id).await {
            let err = TurnError::from(e);
            warn!(thread_id = %thread_id, error = %err, "Checkpoint store unavailable");
            self.output.send(storage_error_message(&err)).await;
            return Err(err);
        }

        let pipeline = match self.pipeline().await {
            Ok(p) => p,
            Err(e) => {
                self.output.send(format!("The tools for this persona could not be set up.\n\n{e}")).await;
                return Err(TurnError::ConfigurationMissing(format!("tool setup failed: {e}")));
            }
        };

        let provider = match self.factory.create(&model_id, &model_args) {
            Ok(p) => p,
            Err(e) => {
                self.output.send(format!("Could not start the chat model `{model_id}`.\n\n{e}")).await;
                return Err(TurnError::ModelInvocationFailed(e));
            }
        };

        let system_prompt = match self.assembler.build(&model_id, &self.defaults.name, message).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(persona = %self.defaults.name, error = %e, "System prompt template failed to render");
                self.output
                    .send(format!("The system prompt for {} could not be rendered.\n\n{e}", self.defaults.name))
                    .await;
                return Err(TurnError::ConfigurationMissing(format!("system prompt template: {e}")));
            }
        };
        debug!(thread_id = %thread_id, prompt_len = system_prompt.len(), "System prompt assembled");

        let mut agent = AgentLoop::new(provider, model_id.clone(), system_prompt, pipeline, memory.clone())
            .with_max_iterations(self.settings.max_iterations)
            .with_turn_timeout(self.settings.turn_timeout_secs.map(Duration::from_secs));
        if let Some(t) = model_args.get("temperature").and_then(Value::as_f64) {
            agent = agent.with_temperature(t as f32);
        }
        if let Some(max) = model_args
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|m| u32::try_from(m).ok())
        {
            agent = agent.with_max_tokens(max);
        }

        info!(
            persona = %self.defaults.name,
            thread_id = %thread_id,
            model = %model_id,
            attachments = message.attachments.len(),
            "Handling message"
        );
        deliver_turn(self.output.as_ref(), agent.run_turn(&thread_id, message.body.clone())).await
    }

    /// Release the memory store. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(memory) = &self.session.memory {
            memory.close().await;
        }
        info!(persona = %self.defaults.name, "Persona shut down");
    }
}
