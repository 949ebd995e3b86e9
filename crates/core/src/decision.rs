//! DecisionMaker trait: the abstraction over the language model.
//!
//! Given the system instructions, the conversation so far and the tool
//! schemas, a decision maker either asks for tool calls or answers.
//! Implementations: OpenAI-compatible HTTP endpoints, scripted test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::DecisionError;
use crate::message::{ToolCallRequest, Turn};
use crate::tool::ToolDefinition;

/// Everything the decision maker sees for one decision step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// System instructions, sent ahead of the history
    pub system_prompt: String,

    /// Full turn history of the session, oldest first
    pub history: Vec<Turn>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// What the model chose to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Invoke these tools, in order. `thought` is any text emitted alongside.
    ToolCalls {
        #[serde(default)]
        thought: String,
        calls: Vec<ToolCallRequest>,
    },

    /// Final answer for the user.
    Answer { text: String },
}

impl Decision {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer { text: text.into() }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self::ToolCalls {
            thought: String::new(),
            calls,
        }
    }

    /// An empty tool-call list is an answer carrying the thought text.
    pub fn normalize(self) -> Self {
        match self {
            Self::ToolCalls { thought, calls } if calls.is_empty() => Self::Answer { text: thought },
            other => other,
        }
    }
}

/// The core DecisionMaker trait.
///
/// Failures are transient-error signals (network, timeout, bad status); the
/// run driver treats them as fatal for the current run and never retries.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    /// A human-readable name for this decision maker.
    fn name(&self) -> &str;

    /// Choose between tool calls and a final answer.
    async fn decide(&self, request: DecisionRequest) -> std::result::Result<Decision, DecisionError>;
}
