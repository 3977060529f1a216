//! `ecotrace config`: Configuration management commands.

use ecotrace_config::AppConfig;
use std::path::PathBuf;

fn config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set api_key or ECOTRACE_API_KEY)");
            }
            if config.sync_mode {
                warnings.push("sync_mode is on: every submission waits for the scorer");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   API URL:      {}", config.api_url);
            println!(
                "   Environment:  {}",
                config.environment.as_deref().unwrap_or("-")
            );
            println!("   Queue:        {} jobs", config.dispatch.capacity);
            println!("   HTTP timeout: {}s", config.http.timeout_secs);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_redacted(&config)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if path.exists() && !force {
        println!("  Config file already exists: {}", path.display());
        println!("  Re-run with --force to overwrite it.");
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", path.display());
    println!("   Set api_key there or export ECOTRACE_API_KEY.");
    Ok(())
}

fn render_redacted(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("***".into());
    }
    toml::to_string_pretty(&shown)
}
