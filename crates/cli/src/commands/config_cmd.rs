//! `cellpilot config` — Configuration management commands.

use cellpilot_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!(
                "   Model:     {}",
                config.chat_model.as_deref().unwrap_or("(not configured)")
            );
            println!("   Persona:   {}", config.persona.name);
            println!("   Workspace: {}", config.tools.root().display());
            println!("   Memory:    {}", config.memory.path.display());
            println!("   Max steps: {}", config.agent.max_iterations);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Things that load fine but will get in the way at chat time.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.chat_model.is_none() {
        warnings.push("No chat model set (set chat_model or CELLPILOT_CHAT_MODEL)");
    }

    if !config.chat_model_args.contains_key("api_key")
        && !config.chat_model_args.contains_key("api_base")
    {
        warnings.push("No api_key or api_base in chat_model_args (set CELLPILOT_API_KEY)");
    }

    if !config.tools.root().is_dir() {
        warnings.push("Workspace root is not a directory; file tools will be unavailable");
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", config.to_redacted_toml());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
