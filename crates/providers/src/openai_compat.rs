//! OpenAI-compatible decision maker.
//!
//! Works with any endpoint exposing `/chat/completions` with function
//! calling: Typhoon, OpenAI, OpenRouter, vLLM, Ollama.

use async_trait::async_trait;
use deskloop_core::decision::{Decision, DecisionMaker, DecisionRequest};
use deskloop_core::error::DecisionError;
use deskloop_core::message::{Role, ToolCallRequest, Turn};
use deskloop_core::tool::ToolDefinition;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A decision maker backed by an OpenAI-compatible chat completions API.
pub struct OpenAiCompatDecisionMaker {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatDecisionMaker {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            client,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// System prompt first, then every turn in order.
    fn to_api_messages(system_prompt: &str, history: &[Turn]) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(system_prompt.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        messages.extend(history.iter().map(|t| ApiMessage {
            role: match t.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
                Role::ToolResult => "tool".into(),
            },
            content: if t.content.is_empty() && t.requests_tools() {
                None
            } else {
                Some(t.content.clone())
            },
            tool_calls: if t.tool_calls.is_empty() {
                None
            } else {
                Some(
                    t.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: t.tool_call_id.clone(),
        }));
        messages
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Turn the first choice into a decision. Unparseable tool arguments are
    /// passed through as a JSON string so the tool itself reports them.
    fn parse_decision(response: ApiResponse) -> Result<Decision, DecisionError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DecisionError::MalformedResponse("No choices in response".into()))?;

        let thought = choice.message.content.unwrap_or_default();
        let calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let raw = tc.function.arguments;
                let arguments = if raw.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
                };
                ToolCallRequest {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(Decision::ToolCalls { thought, calls }.normalize())
    }

    fn build_body(&self, request: &DecisionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.system_prompt, &request.history),
            "temperature": self.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }
}

#[async_trait]
impl DecisionMaker for OpenAiCompatDecisionMaker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(
            provider = %self.name,
            model = %self.model,
            turns = request.history.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DecisionError::Timeout(e.to_string())
                } else {
                    DecisionError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(DecisionError::RateLimited { retry_after_secs });
        }

        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(DecisionError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| DecisionError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        Self::parse_decision(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Decision, DecisionError> {
        let response: ApiResponse = serde_json::from_str(json).unwrap();
        OpenAiCompatDecisionMaker::parse_decision(response)
    }

    #[test]
    fn constructor_trims_base_url() {
        let dm = OpenAiCompatDecisionMaker::new("typhoon", "https://api.opentyphoon.ai/v1/", "sk", "m")
            .with_temperature(0.2)
            .with_max_tokens(512);
        assert_eq!(dm.name(), "typhoon");
        assert_eq!(dm.base_url, "https://api.opentyphoon.ai/v1");
        assert_eq!(dm.model(), "m");
    }

    #[test]
    fn message_conversion_puts_system_first() {
        let history = vec![Turn::user("Hello"), Turn::assistant("Hi!")];
        let msgs = OpenAiCompatDecisionMaker::to_api_messages("You are helpful", &history);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].role, "user");
        assert_eq!(msgs[2].role, "assistant");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let call = ToolCallRequest::new("get_ticket", serde_json::json!({"ticket_id": 3}));
        let history = vec![
            Turn::user("status of #3?"),
            Turn::assistant_with_calls("", vec![call.clone()]),
            Turn::tool_result(&call, "Status: OPEN"),
        ];
        let msgs = OpenAiCompatDecisionMaker::to_api_messages("", &history);
        assert_eq!(msgs.len(), 3);

        assert!(msgs[1].content.is_none());
        let tc = msgs[1].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "get_ticket");
        assert_eq!(tc[0].function.arguments, r#"{"ticket_id":3}"#);

        assert_eq!(msgs[2].role, "tool");
        assert_eq!(msgs[2].tool_call_id.as_deref(), Some(call.id.as_str()));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "search_it_policy".into(),
            description: "Search policies".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatDecisionMaker::to_api_tools(&tools);
        assert_eq!(api_tools[0].function.name, "search_it_policy");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn body_includes_tools_only_when_present() {
        let dm = OpenAiCompatDecisionMaker::new("t", "http://localhost", "", "m").with_max_tokens(64);
        let mut request = DecisionRequest {
            system_prompt: "sys".into(),
            history: vec![Turn::user("hi")],
            tools: vec![],
        };
        let body = dm.build_body(&request);
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 64);

        request.tools.push(ToolDefinition {
            name: "get_current_time".into(),
            description: "now".into(),
            parameters: serde_json::json!({"type": "object"}),
        });
        assert_eq!(dm.build_body(&request)["tools"][0]["function"]["name"], "get_current_time");
    }

    #[test]
    fn parse_plain_answer() {
        let decision = parse(r#"{"choices":[{"message":{"role":"assistant","content":"Restart the router."}}]}"#).unwrap();
        assert_eq!(decision, Decision::answer("Restart the router."));
    }

    #[test]
    fn parse_tool_calls() {
        let decision = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
                {"id":"call_a","type":"function","function":{"name":"search_it_policy","arguments":"{\"query\":\"vpn\"}"}},
                {"id":"call_b","type":"function","function":{"name":"get_current_time","arguments":""}}
            ]}}]}"#,
        )
        .unwrap();

        let Decision::ToolCalls { thought, calls } = decision else {
            panic!("expected tool calls");
        };
        assert!(thought.is_empty());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments["query"], "vpn");
        assert_eq!(calls[1].arguments, serde_json::json!({}));
    }

    #[test]
    fn parse_bad_arguments_passes_raw_string() {
        let decision = parse(
            r#"{"choices":[{"message":{"role":"assistant","tool_calls":[
                {"id":"c","type":"function","function":{"name":"get_ticket","arguments":"{oops"}}
            ]}}]}"#,
        )
        .unwrap();
        let Decision::ToolCalls { calls, .. } = decision else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].arguments, serde_json::Value::String("{oops".into()));
    }

    #[test]
    fn parse_empty_choices_is_malformed() {
        let err = parse(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, DecisionError::MalformedResponse(_)));
    }
}
