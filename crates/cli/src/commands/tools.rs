//! `deskloop tools`: list the built-in tools.

use deskloop_config::AppConfig;

use super::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = runtime::build_tools(&config);

    println!("{} tools available:", registry.len());
    println!();
    for def in registry.definitions() {
        let summary = def.description.lines().next().unwrap_or_default();
        println!("  {:<30} {}", def.name, summary);
    }
    Ok(())
}
