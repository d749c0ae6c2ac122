//! `cellpilot memory` — Inspect stored conversation threads.

use std::time::Duration;

use cellpilot_config::AppConfig;
use cellpilot_core::message::{Message, Role, ThreadId};
use cellpilot_memory::MemoryStore;

fn open_store(config: &AppConfig) -> MemoryStore {
    MemoryStore::sqlite(
        config.memory.path.clone(),
        Duration::from_millis(config.memory.busy_timeout_ms),
    )
}

pub async fn threads() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = open_store(&config);

    let threads = store.scoped(store.list_threads()).await?;

    println!("🧠 Conversation threads ({})", config.memory.path.display());
    println!("====================");
    if threads.is_empty() {
        println!("   No threads yet.");
    }
    for t in &threads {
        println!(
            "  {:<24} v{:<4} {:>4} messages   updated {}",
            t.thread_id,
            t.version,
            t.message_count,
            t.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

pub async fn show(thread: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = open_store(&config);
    let thread_id = ThreadId::from(thread);

    let checkpoint = store
        .scoped(async {
            let handle = store.get_or_create(&thread_id).await?;
            handle.load().await
        })
        .await?;

    if !checkpoint.is_committed() {
        println!("   No history for thread '{thread}'.");
        return Ok(());
    }

    println!(
        "🧵 Thread '{thread}' — version {}, {} messages",
        checkpoint.version,
        checkpoint.messages.len()
    );
    println!();
    for message in &checkpoint.messages {
        println!("{}", render(message));
    }

    Ok(())
}

/// One history entry as a terminal line.
fn render(message: &Message) -> String {
    let label = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::Tool if message.is_tool_error() => "Tool (error)",
        Role::Tool => "Tool",
    };
    let mut line = format!("  [{label}] {}", message.content);
    for call in &message.tool_calls {
        line.push_str(&format!("\n      → {}({})", call.name, call.arguments));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_core::message::MessageToolCall;

    #[test]
    fn renders_tool_calls_and_errors() {
        let call = MessageToolCall {
            id: "c1".into(),
            name: "glob_search".into(),
            arguments: r#"{"pattern":"*.ipynb"}"#.into(),
        };
        let assistant = render(&Message::assistant_tool_calls("", vec![call]));
        assert!(assistant.starts_with("  [Assistant]"));
        assert!(assistant.contains(r#"→ glob_search({"pattern":"*.ipynb"})"#));

        let failed = render(&Message::tool_error("c1", "boom"));
        assert_eq!(failed, "  [Tool (error)] boom");
    }
}
