//! `deskloop config`: show the effective configuration.

use deskloop_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    if !config.has_api_key() {
        println!("# warning: no API key set (DESKLOOP_API_KEY or OPENAI_API_KEY)");
    }
    println!();
    println!("{}", config.to_redacted_toml());
    Ok(())
}
