//! `cellpilot chat` — Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cellpilot_agent::Persona;
use cellpilot_config::AppConfig;
use cellpilot_core::chat::{Attachment, ChatMessage};
use cellpilot_core::error::TurnError;
use cellpilot_core::output::{FragmentStream, OutputChannel};
use cellpilot_memory::MemoryStore;
use cellpilot_providers::OpenAiCompatFactory;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

pub const DEFAULT_THREAD: &str = "cli";

const SENDER: &str = "user";

/// Prints replies to stdout as they arrive.
///
/// The lock is held per fragment, never across a whole stream.
#[derive(Default)]
pub struct TerminalOutput {
    lock: tokio::sync::Mutex<()>,
}

impl TerminalOutput {
    async fn write(&self, text: &str) {
        let _guard = self.lock.lock().await;
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

#[async_trait]
impl OutputChannel for TerminalOutput {
    async fn send(&self, text: String) {
        self.write(&format!("\n{text}\n")).await;
    }

    async fn stream(&self, mut fragments: FragmentStream) -> Result<(), TurnError> {
        let mut started = false;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    if !started {
                        self.write("\n").await;
                        started = true;
                    }
                    self.write(&fragment).await;
                }
                Err(e) => {
                    self.write(&format!("\n  ❌ {e}\n")).await;
                    return Err(e);
                }
            }
        }
        if started {
            self.write("\n").await;
        }
        Ok(())
    }
}

/// Parse `NOTEBOOK:CELL_ID` into a notebook-cell attachment.
pub fn parse_cell_attachment(spec: &str) -> Result<Attachment, String> {
    match spec.rsplit_once(':') {
        Some((path, cell_id)) if !path.is_empty() && !cell_id.is_empty() => {
            Ok(Attachment::notebook_cell(path, cell_id))
        }
        _ => Err(format!("Invalid cell attachment '{spec}', expected NOTEBOOK:CELL_ID")),
    }
}

fn build_message(
    thread: &str,
    body: &str,
    files: &[String],
    cells: &[Attachment],
) -> ChatMessage {
    let mut message = ChatMessage::new(thread, SENDER, body);
    for path in files {
        message = message.with_attachment(Attachment::file(path.as_str()));
    }
    for cell in cells {
        message = message.with_attachment(cell.clone());
    }
    message
}

pub async fn run(
    message: Option<String>,
    thread: String,
    files: Vec<String>,
    cells: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?);
    let cells = cells
        .iter()
        .map(|c| parse_cell_attachment(c))
        .collect::<Result<Vec<_>, _>>()?;

    let memory = Arc::new(MemoryStore::sqlite(
        config.memory.path.clone(),
        Duration::from_millis(config.memory.busy_timeout_ms),
    ));
    let output = Arc::new(TerminalOutput::default());
    let persona = Persona::from_app_config(
        config.clone(),
        memory.clone(),
        output,
        Arc::new(OpenAiCompatFactory::new()),
        None,
    );

    memory
        .scoped(async {
            match message {
                Some(body) => {
                    // Single message mode; the error was already shown.
                    persona
                        .on_message(&build_message(&thread, &body, &files, &cells))
                        .await
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
                }
                None => interactive(&persona, &config, &thread, &files, &cells).await,
            }
        })
        .await
}

async fn interactive(
    persona: &Persona,
    config: &AppConfig,
    thread: &str,
    files: &[String],
    cells: &[Attachment],
) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        CellPilot Chat — Interactive Mode     ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Persona:   {}", persona.name());
    println!(
        "  Model:     {}",
        config.chat_model.as_deref().unwrap_or("(not configured)")
    );
    println!("  Thread:    {thread}");
    println!("  Workspace: {}", config.tools.root().display());
    println!("  Memory:    {}", config.memory.path.display());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut first = true;
    loop {
        print!("\n  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let body = line.trim();
        if body.is_empty() {
            continue;
        }
        if body == "exit" || body == "quit" {
            break;
        }

        // Attachments from the command line go with the first message only.
        let message = if first {
            build_message(thread, body, files, cells)
        } else {
            build_message(thread, body, &[], &[])
        };
        first = false;

        if let Err(e) = persona.on_message(&message).await {
            debug!(error = %e, "Turn ended with an error");
        }
    }

    println!("\n  Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_core::chat::AttachmentKind;

    #[test]
    fn cell_attachment_splits_on_last_colon() {
        let a = parse_cell_attachment("C:/work/nb.ipynb:abc-1").unwrap();
        assert_eq!(a.kind, AttachmentKind::NotebookCell);
        assert_eq!(a.path, "C:/work/nb.ipynb");
        assert_eq!(a.cell_id.as_deref(), Some("abc-1"));
    }

    #[test]
    fn cell_attachment_rejects_missing_parts() {
        assert!(parse_cell_attachment("nb.ipynb").is_err());
        assert!(parse_cell_attachment("nb.ipynb:").is_err());
        assert!(parse_cell_attachment(":c1").is_err());
    }

    #[test]
    fn message_carries_thread_and_attachments() {
        let cells = vec![Attachment::notebook_cell("nb.ipynb", "c1")];
        let message = build_message("room", "hi", &["data.csv".to_string()], &cells);
        assert_eq!(message.thread_id().as_str(), "room");
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].kind, AttachmentKind::File);
    }
}
