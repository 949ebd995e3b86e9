//! Process-wide wiring: every shared component is built once here and
//! handed to whatever needs it.

use std::sync::Arc;
use std::time::Duration;

use deskloop_agent::{ExecutionLoop, RunDriver};
use deskloop_config::AppConfig;
use deskloop_core::event::EventBus;
use deskloop_core::tool::ToolRegistry;
use deskloop_memory::InMemoryConversationStore;
use deskloop_tools::{DocumentIndex, TicketBook};

/// Load the document index and build the built-in tool registry.
pub fn build_tools(config: &AppConfig) -> ToolRegistry {
    let docs = &config.documents;
    let index = DocumentIndex::load(&docs.dir, docs.chunk_size, docs.top_k);
    deskloop_tools::default_registry(Arc::new(index), Arc::new(TicketBook::new()))
}

/// Build the run driver: decision maker, tools, store and event bus.
pub fn build_driver(config: &AppConfig) -> Result<RunDriver, Box<dyn std::error::Error>> {
    let decision_maker = deskloop_providers::build_from_config(config)?;
    let tools = Arc::new(build_tools(config));
    let store = Arc::new(InMemoryConversationStore::new());
    let event_bus = Arc::new(EventBus::new());

    let mut execution = ExecutionLoop::new(decision_maker, tools, store, event_bus)
        .with_max_iterations(config.agent.max_iterations);
    if let Some(prompt) = &config.agent.system_prompt {
        execution = execution.with_system_prompt(prompt.clone());
    }

    Ok(RunDriver::new(Arc::new(execution))
        .with_poll_interval(Duration::from_millis(config.streaming.poll_interval_ms))
        .with_idle_timeout(Duration::from_secs(config.streaming.idle_timeout_secs)))
}

/// Print setup help when no API key is configured.
pub fn require_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.has_api_key() {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    DESKLOOP_API_KEY = '...'");
    eprintln!("    OPENAI_API_KEY   = '...'   (any OpenAI-compatible endpoint)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}
