//! `deskloop chat`: single-message or interactive chat.

use std::io::Write;

use deskloop_agent::{FAILURE_MESSAGE, RunDriver, RunOutcome, TerminationReason};
use deskloop_config::AppConfig;
use deskloop_core::event::{Event, EventKind};
use deskloop_core::message::SessionKey;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::runtime;

pub async fn run(
    message: Option<String>,
    session: Option<String>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    runtime::require_api_key(&config)?;
    let driver = runtime::build_driver(&config)?;
    let session = session
        .map(SessionKey::from)
        .unwrap_or_else(SessionKey::generate);

    if let Some(msg) = message {
        // Single message mode
        let outcome = ask(&driver, &session, msg, stream).await?;
        println!("{}", outcome.answer);
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  deskloop IT support, interactive mode");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Session:   {session}");
    println!("  Tools:     {}", driver.execution().tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'clear' to forget this conversation, 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            "exit" | "quit" => break,
            "clear" => {
                driver.execution().store().clear(&session).await?;
                println!("  (conversation cleared)");
            }
            _ => match ask(&driver, &session, input.to_string(), stream).await {
                Ok(outcome) => {
                    println!();
                    for line in outcome.answer.lines() {
                        println!("  Assistant > {line}");
                    }
                    if outcome.termination_reason == TerminationReason::IterationLimit {
                        println!("  (stopped after {} steps)", outcome.iterations);
                    }
                    println!();
                }
                Err(e) => {
                    debug!(error = %e, "Chat turn failed");
                    eprintln!("  [Error] {FAILURE_MESSAGE}");
                    eprintln!("          {e}");
                    println!();
                }
            },
        }
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Run one message. In streaming mode progress lines go to stderr as the
/// run publishes them.
async fn ask(
    driver: &RunDriver,
    session: &SessionKey,
    message: String,
    stream: bool,
) -> Result<RunOutcome, deskloop_core::Error> {
    if !stream {
        return driver.run(session.clone(), message).await;
    }

    let mut events = driver.stream(session.clone(), message);
    while let Some(event) = events.next_event().await {
        if let Some(line) = render_event(&event) {
            eprintln!("  {line}");
        }
    }
    events.finish().await
}

/// One progress line for an event, or `None` for events not worth showing.
fn render_event(event: &Event) -> Option<String> {
    let text = |key: &str| event.get(key).and_then(|v| v.as_str()).unwrap_or_default();

    match event.kind {
        EventKind::Status => Some(format!("· {}", text("message"))),
        EventKind::ToolStarted => Some(format!(
            "→ {}({})",
            text("tool"),
            event.get("args").map(|a| a.to_string()).unwrap_or_default()
        )),
        EventKind::ToolEnded if event.get("success") == Some(&serde_json::Value::Bool(false)) => {
            Some(format!("✗ {} failed: {}", text("tool"), text("error")))
        }
        EventKind::RunError => Some(format!("✗ {}", text("error"))),
        _ => None,
    }
}
