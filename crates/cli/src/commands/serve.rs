//! `deskloop serve`: start the HTTP API server.

use deskloop_config::AppConfig;

use super::runtime;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    runtime::require_api_key(&config)?;
    let driver = runtime::build_driver(&config)?;

    println!("deskloop gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model);
    println!("   Tools:     {}", driver.execution().tools().len());

    deskloop_gateway::start(&config, driver).await?;

    Ok(())
}
