//! Scripted stand-ins shared by the agent tests.

use async_trait::async_trait;
use deskloop_core::decision::{Decision, DecisionMaker, DecisionRequest};
use deskloop_core::error::{DecisionError, ToolError};
use deskloop_core::message::ToolCallRequest;
use deskloop_core::tool::{Tool, ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Returns scripted decisions in order, then fails once the script runs out.
pub struct ScriptedDecisionMaker {
    script: Mutex<VecDeque<Result<Decision, DecisionError>>>,
    requests: Mutex<Vec<DecisionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedDecisionMaker {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self::with_results(decisions.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<Decision, DecisionError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before every decision.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecisionMaker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DecisionError::Network("script exhausted".into())))
    }
}

/// Panics on every call.
pub struct PanickingDecisionMaker;

#[async_trait]
impl DecisionMaker for PanickingDecisionMaker {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn decide(&self, _request: DecisionRequest) -> Result<Decision, DecisionError> {
        panic!("decision maker blew up");
    }
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        Ok(ToolResult::ok(text))
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "always_fails"
    }

    fn description(&self) -> &str {
        "Fails every time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "always_fails".into(),
            reason: "backend unavailable".into(),
        })
    }
}

pub fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    registry
}

pub fn tool_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(name, args)
}
