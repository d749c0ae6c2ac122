//! End-to-end tests for the CellPilot turn pipeline.
//!
//! These tests drive a real persona (real tools, real SQLite checkpoints,
//! real prompt assembly) with a scripted streaming model, from the incoming
//! chat message to the fragments the host would render.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cellpilot_agent::{CONFIGURATION_GUIDANCE, Persona, SessionState};
use cellpilot_config::AppConfig;
use cellpilot_core::chat::{Attachment, ChatMessage};
use cellpilot_core::error::{ProviderError, TurnError};
use cellpilot_core::message::{Message, MessageToolCall, Role, ThreadId};
use cellpilot_core::output::{CollectingOutput, Delivery};
use cellpilot_core::persona::PersonaDefaults;
use cellpilot_core::provider::{
    ChunkReceiver, Provider, ProviderFactory, ProviderRequest, ProviderResponse, StreamChunk,
};
use cellpilot_memory::MemoryStore;
use cellpilot_tools::notebook::Notebook;
use serde_json::{Map, Value, json};

// ── Mock Model ───────────────────────────────────────────────────────────

/// A streaming model that replays scripted chunk sequences in order.
struct ScriptedModel {
    scripts: Mutex<Vec<Vec<StreamChunk>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedModel {
    fn new(scripts: Vec<Vec<StreamChunk>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().rev().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Provider for ScriptedModel {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("e2e model only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let Some(chunks) = self.scripts.lock().unwrap().pop() else {
            panic!("ScriptedModel exhausted at call #{count}");
        };
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(Ok(chunk)).await.unwrap();
        }
        Ok(rx)
    }
}

struct Factory {
    model: Arc<ScriptedModel>,
}

impl ProviderFactory for Factory {
    fn create(&self, _model_id: &str, _args: &Map<String, Value>) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(self.model.clone())
    }
}

fn tool_call(id: &str, name: &str, args: Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

fn text(fragments: &[&str]) -> Vec<StreamChunk> {
    fragments.iter().map(|f| StreamChunk::text(*f)).collect()
}

fn calls(batch: Vec<MessageToolCall>) -> Vec<StreamChunk> {
    vec![StreamChunk::tool_calls(batch)]
}

// ── Fixture ─────────────────────────────────────────────────────────────

struct Workspace {
    dir: tempfile::TempDir,
    config: Arc<AppConfig>,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("sales.csv"), "region,total\nnorth,10\nsouth,7\n").unwrap();
        std::fs::write(root.join("notes.md"), "# Notes\nrevenue grew\n").unwrap();

        let mut config = AppConfig::default();
        config.chat_model = Some("openai/gpt-4o-mini".into());
        config.memory.path = dir.path().join("data").join("memory.sqlite");
        config.memory.busy_timeout_ms = 1_000;
        config.tools.root_dir = Some(root);
        config.tools.shell_allowlist = vec!["ls".into()];
        Self {
            dir,
            config: Arc::new(config),
        }
    }

    fn root(&self) -> &Path {
        self.config.tools.root_dir.as_deref().unwrap()
    }

    fn memory(&self) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::sqlite(
            self.config.memory.path.clone(),
            Duration::from_millis(self.config.memory.busy_timeout_ms),
        ))
    }

    fn persona(
        &self,
        memory: Arc<MemoryStore>,
        model: Arc<ScriptedModel>,
    ) -> (Persona, Arc<CollectingOutput>) {
        let output = Arc::new(CollectingOutput::new());
        let persona = Persona::from_app_config(
            self.config.clone(),
            memory,
            output.clone(),
            Arc::new(Factory { model }),
            None,
        );
        (persona, output)
    }
}

async fn history(memory: &MemoryStore, thread: &str) -> Vec<Message> {
    memory
        .get_or_create(&ThreadId::from(thread))
        .await
        .unwrap()
        .load()
        .await
        .unwrap()
        .messages
}

fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role.clone()).collect()
}

// ── E2E: Tool-using turn ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_list_files_turn() {
    let ws = Workspace::new();
    let memory = ws.memory();
    let model = ScriptedModel::new(vec![
        calls(vec![tool_call("call_1", "glob_search", json!({"pattern": "*.csv"}))]),
        text(&["There is one CSV file: ", "`sales.csv`."]),
    ]);
    let (persona, output) = ws.persona(memory.clone(), model.clone());

    persona
        .on_message(&ChatMessage::new("room-1", "ada", "List the CSV files"))
        .await
        .unwrap();

    let deliveries = output.deliveries().await;
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].text(), r#"Running **glob_search** with *{"pattern":"*.csv"}*"#);
    assert_eq!(deliveries[1].text(), "sales.csv");
    assert!(deliveries[1].text().chars().count() <= 100);
    assert_eq!(
        deliveries[2],
        Delivery::Stream {
            fragments: vec!["There is one CSV file: ".into(), "`sales.csv`.".into()],
            error: None,
        }
    );

    // The model saw the tool result on its second call.
    assert_eq!(model.calls(), 2);
    let second = model.request(1);
    let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_msg.content, "sales.csv");

    let messages = history(&memory, "room-1").await;
    assert_eq!(
        roles(&messages),
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(messages[0].content, "List the CSV files");
    assert_eq!(messages[1].tool_calls[0].id, "call_1");
    assert_eq!(messages[3].content, "There is one CSV file: `sales.csv`.");

    persona.shutdown().await;
}

#[tokio::test]
async fn e2e_reply_text_and_tool_notes_keep_their_order() {
    let ws = Workspace::new();
    let model = ScriptedModel::new(vec![
        vec![
            StreamChunk::text("Let me look."),
            StreamChunk::tool_calls(vec![tool_call("call_1", "glob_search", json!({"pattern": "*.md"}))]),
        ],
        text(&["Found ", "notes.md."]),
    ]);
    let (persona, output) = ws.persona(ws.memory(), model);

    persona
        .on_message(&ChatMessage::new("room-1b", "ada", "any notes?"))
        .await
        .unwrap();

    assert_eq!(
        output.texts().await,
        vec![
            "Let me look.".to_string(),
            r#"Running **glob_search** with *{"pattern":"*.md"}*"#.to_string(),
            "notes.md".to_string(),
            "Found notes.md.".to_string(),
        ]
    );
}

#[tokio::test]
async fn e2e_tool_failure_is_fed_back_to_the_model() {
    let ws = Workspace::new();
    let memory = ws.memory();
    let model = ScriptedModel::new(vec![
        calls(vec![tool_call("call_rm", "shell", json!({"command": "rm -rf data"}))]),
        text(&["I am not allowed to delete files here."]),
    ]);
    let (persona, output) = ws.persona(memory.clone(), model.clone());

    persona
        .on_message(&ChatMessage::new("room-2", "ada", "clean up"))
        .await
        .unwrap();

    let texts = output.texts().await;
    assert!(texts[0].starts_with("Running **shell**"));
    assert!(texts[1].starts_with("**shell** failed: "));
    assert!(texts[1].contains("not in allowlist"));
    assert_eq!(texts[2], "I am not allowed to delete files here.");

    let messages = history(&memory, "room-2").await;
    let tool = &messages[2];
    assert!(tool.is_tool_error());
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_rm"));
    assert!(ws.root().join("sales.csv").exists());
}

#[tokio::test]
async fn e2e_notebook_edit_lands_on_disk() {
    let ws = Workspace::new();
    let memory = ws.memory();
    let model = ScriptedModel::new(vec![
        calls(vec![tool_call(
            "call_add",
            "add_cell",
            json!({"path": "analysis.ipynb", "source": "import pandas as pd", "cell_type": "code"}),
        )]),
        calls(vec![tool_call("call_read", "read_notebook", json!({"path": "analysis.ipynb"}))]),
        text(&["Added an import cell."]),
    ]);
    let (persona, output) = ws.persona(memory.clone(), model.clone());

    persona
        .on_message(&ChatMessage::new("room-3", "ada", "start a notebook that imports pandas"))
        .await
        .unwrap();

    let notebook = Notebook::load(&ws.root().join("analysis.ipynb")).await.unwrap();
    assert_eq!(notebook.cells.len(), 1);
    assert_eq!(notebook.cells[0].source, "import pandas as pd");

    let texts = output.texts().await;
    assert_eq!(texts.len(), 5);
    assert_eq!(texts[4], "Added an import cell.");

    // user, assistant+call, tool, assistant+call, tool, assistant
    assert_eq!(history(&memory, "room-3").await.len(), 6);
    assert_eq!(model.calls(), 3);
}

// ── E2E: Prompt assembly ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_attachments_reach_the_system_prompt() {
    let ws = Workspace::new();
    let model = ScriptedModel::new(vec![text(&["North sold more."])]);
    let (persona, _output) = ws.persona(ws.memory(), model.clone());

    let message = ChatMessage::new("room-4", "ada", "who sold more?")
        .with_attachment(Attachment::file("sales.csv"));
    persona.on_message(&message).await.unwrap();

    let request = model.request(0);
    let system = &request.messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.starts_with("You are Jupyternaut"));
    assert!(system.content.contains("`openai/gpt-4o-mini`"));
    assert!(system.content.contains("File `sales.csv`:\n```csv\nregion,total"));

    let tools: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
    assert!(tools.contains(&"glob_search"));
    assert!(tools.contains(&"add_cell"));
    assert!(!tools.contains(&"open_file"));
}

// ── E2E: Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_history_survives_reopen() {
    let ws = Workspace::new();
    let model = ScriptedModel::new(vec![text(&["Hello Ada."]), text(&["You said hi."])]);

    let memory = ws.memory();
    let (persona, _output) = ws.persona(memory.clone(), model.clone());
    persona.on_message(&ChatMessage::new("room-5", "ada", "hi")).await.unwrap();
    persona
        .on_message(&ChatMessage::new("room-5", "ada", "what did I say?"))
        .await
        .unwrap();
    let before = history(&memory, "room-5").await;
    persona.shutdown().await;

    // The second turn saw the first.
    assert_eq!(model.request(1).messages.len(), 4);

    let reopened = ws.memory();
    let after = history(&reopened, "room-5").await;
    assert_eq!(
        after.iter().map(|m| (&m.role, &m.content)).collect::<Vec<_>>(),
        before.iter().map(|m| (&m.role, &m.content)).collect::<Vec<_>>()
    );
    assert_eq!(
        roles(&after),
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );

    let threads = reopened.list_threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].message_count, 4);
    reopened.close().await;
}

// ── E2E: Failure paths ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_no_chat_model_only_guides() {
    let ws = Workspace::new();
    let mut config = (*ws.config).clone();
    config.chat_model = None;
    let model = ScriptedModel::new(vec![]);
    let memory = ws.memory();
    let output = Arc::new(CollectingOutput::new());
    let persona = Persona::from_app_config(
        Arc::new(config),
        memory.clone(),
        output.clone(),
        Arc::new(Factory { model: model.clone() }),
        None,
    );

    let err = persona
        .on_message(&ChatMessage::new("room-6", "ada", "hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::ConfigurationMissing(_)));
    assert_eq!(output.texts().await, vec![CONFIGURATION_GUIDANCE.to_string()]);
    assert_eq!(model.calls(), 0);
    assert!(!memory.is_open());
    assert!(!ws.config.memory.path.exists());
}

#[tokio::test]
async fn e2e_unavailable_storage_skips_the_model() {
    let ws = Workspace::new();
    let blocker = ws.dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let memory = Arc::new(MemoryStore::sqlite(
        blocker.join("memory.sqlite"),
        Duration::from_millis(100),
    ));
    let model = ScriptedModel::new(vec![]);
    let (persona, output) = ws.persona(memory, model.clone());

    let err = persona
        .on_message(&ChatMessage::new("room-7", "ada", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::StorageUnavailable(_)));

    let texts = output.texts().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Conversation memory is unavailable"));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn e2e_session_without_config_provider() {
    let model = ScriptedModel::new(vec![]);
    let output = Arc::new(CollectingOutput::new());
    let persona = Persona::new(
        PersonaDefaults::default(),
        SessionState::default(),
        output.clone(),
        Arc::new(Factory { model: model.clone() }),
    );

    let err = persona
        .on_message(&ChatMessage::new("room-8", "ada", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::ConfigurationMissing(_)));
    assert!(output.texts().await[0].contains("requires"));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn e2e_iteration_limit_keeps_committed_steps() {
    let ws = Workspace::new();
    let mut config = (*ws.config).clone();
    config.agent.max_iterations = 1;
    let model = ScriptedModel::new(vec![calls(vec![tool_call(
        "call_ls",
        "glob_search",
        json!({"pattern": "*.md"}),
    )])]);
    let memory = ws.memory();
    let output = Arc::new(CollectingOutput::new());
    let persona = Persona::from_app_config(
        Arc::new(config),
        memory.clone(),
        output.clone(),
        Arc::new(Factory { model: model.clone() }),
        None,
    );

    let err = persona
        .on_message(&ChatMessage::new("room-9", "ada", "loop forever"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::IterationLimit { limit: 1 }));
    assert_eq!(model.calls(), 1);

    let messages = history(&memory, "room-9").await;
    assert_eq!(roles(&messages), vec![Role::User, Role::Assistant, Role::Tool]);
    assert_eq!(messages[2].content, "notes.md");
}
