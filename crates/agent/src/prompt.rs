//! System prompt assembly.
//!
//! A prompt is a Jinja template with three fields: the model id, the persona
//! name, and an optional context block built from the message attachments.
//! Rendering is a pure function of its inputs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cellpilot_core::chat::{AttachmentKind, ChatMessage};
use cellpilot_tools::Sandbox;
use cellpilot_tools::notebook::{CellType, Notebook};
use minijinja::Environment;
use serde::Serialize;
use tracing::warn;

const TEMPLATE_NAME: &str = "system_prompt";

/// Attachments larger than this are cut off.
const MAX_ATTACHMENT_CHARS: usize = 20_000;

pub const DEFAULT_SYSTEM_PROMPT_TEMPLATE: &str = "\
You are {{ persona_name }}, an AI agent that lives inside a Jupyter workspace, provided by CellPilot.

You are talking to a person who is working in notebooks, scripts and data files. Help them by \
answering questions, explaining code, and acting on their workspace with the tools you have.

You are powered by a foundation model called `{{ model_id }}`.

Be precise and concise. When you are unsure, say so rather than guessing. Prefer small, \
verifiable steps over large rewrites, and explain what each tool call will change before you \
make it.

You can use Markdown to format your response. Wrap code in fenced blocks with a language tag. \
Use `$...$` for inline math and `$$...$$` for display math.
{% if context %}
The user has attached the following context. Use it when it is relevant to their request.

<context>
{{ context }}
</context>
{% endif %}";

/// Values available to the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemPromptArgs {
    pub model_id: String,
    pub persona_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A system prompt template in Jinja syntax.
///
/// `context` is undefined when there is none (or it is blank), so
/// `{% if context %}` guards the block that shows it.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT_TEMPLATE)
    }
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn render(&self, args: &SystemPromptArgs) -> Result<String, minijinja::Error> {
        let args = SystemPromptArgs {
            context: args.context.clone().filter(|c| !c.trim().is_empty()),
            ..args.clone()
        };
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, &self.source)?;
        let rendered = env.get_template(TEMPLATE_NAME)?.render(&args)?;
        Ok(rendered.trim_end().to_string())
    }
}

/// Turns a message's attachments into prompt context.
#[async_trait]
pub trait AttachmentProcessor: Send + Sync {
    /// Rendered context for `message`, or `None` if it has nothing usable.
    async fn process(&self, message: &ChatMessage) -> Option<String>;
}

/// Reads attached files and notebook cells from the workspace root.
///
/// Attachments that cannot be read are skipped with a warning.
pub struct FileAttachmentProcessor {
    sandbox: Sandbox,
}

impl FileAttachmentProcessor {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    fn locate(&self, path: &str) -> Option<std::path::PathBuf> {
        match self.sandbox.resolve(path) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(path, error = %e, "Skipping attachment outside the workspace");
                None
            }
        }
    }

    async fn render_file(&self, path: &str) -> Option<String> {
        let resolved = self.locate(path)?;
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path, error = %e, "Skipping unreadable attachment");
                return None;
            }
        };
        let lang = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Some(format!("File `{path}`:\n```{lang}\n{}\n```", truncate(&text)))
    }

    async fn render_cell(&self, path: &str, cell_id: &str) -> Option<String> {
        let resolved = self.locate(path)?;
        let notebook = match Notebook::load(&resolved).await {
            Ok(nb) => nb,
            Err(e) => {
                warn!(path, error = %e, "Skipping unreadable notebook attachment");
                return None;
            }
        };
        let index = match notebook.locate(cell_id) {
            Ok(i) => i,
            Err(e) => {
                warn!(path, cell_id, error = %e, "Skipping missing notebook cell");
                return None;
            }
        };
        let cell = &notebook.cells[index];
        let lang = match cell.cell_type {
            CellType::Code => notebook
                .metadata
                .get("kernelspec")
                .and_then(|k| k.get("language"))
                .and_then(|l| l.as_str())
                .unwrap_or(""),
            CellType::Markdown => "markdown",
            CellType::Raw => "",
        };
        Some(format!(
            "Cell `{cell_id}` ({}) of notebook `{path}`:\n```{lang}\n{}\n```",
            cell.cell_type.as_str(),
            truncate(&cell.source)
        ))
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.chars().count() <= MAX_ATTACHMENT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_ATTACHMENT_CHARS).collect();
    format!("{cut}\n... (truncated)")
}

#[async_trait]
impl AttachmentProcessor for FileAttachmentProcessor {
    async fn process(&self, message: &ChatMessage) -> Option<String> {
        let mut blocks = Vec::new();
        for attachment in &message.attachments {
            let block = match (&attachment.kind, attachment.cell_id.as_deref()) {
                (AttachmentKind::NotebookCell, Some(cell_id)) => {
                    self.render_cell(&attachment.path, cell_id).await
                }
                (AttachmentKind::File, _) | (AttachmentKind::NotebookCell, None) => {
                    self.render_file(&attachment.path).await
                }
                (AttachmentKind::Other, _) => None,
            };
            blocks.extend(block);
        }
        if blocks.is_empty() {
            None
        } else {
            Some(blocks.join("\n\n"))
        }
    }
}

/// Builds the system prompt for one message.
#[derive(Clone, Default)]
pub struct PromptAssembler {
    template: PromptTemplate,
    attachments: Option<Arc<dyn AttachmentProcessor>>,
}

impl PromptAssembler {
    pub fn new(template: PromptTemplate) -> Self {
        Self {
            template,
            attachments: None,
        }
    }

    pub fn with_attachment_processor(mut self, processor: Arc<dyn AttachmentProcessor>) -> Self {
        self.attachments = Some(processor);
        self
    }

    pub async fn build(
        &self,
        model_id: &str,
        persona_name: &str,
        message: &ChatMessage,
    ) -> Result<String, minijinja::Error> {
        let context = match &self.attachments {
            Some(processor) => processor.process(message).await,
            None => None,
        };
        self.template.render(&SystemPromptArgs {
            model_id: model_id.to_string(),
            persona_name: persona_name.to_string(),
            context,
        })
    }
}
