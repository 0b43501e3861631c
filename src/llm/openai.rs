//! OpenAI-compatible chat-completions client with tool calling
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::LlmSettings;
use crate::error::OrchestrationError;
use crate::llm::{Completion, CompletionRequest, LlmClient, Role, ToolCall};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Reusable chat-completions client (connection-pooled)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(settings: &LlmSettings) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_tokens: settings.max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> crate::Result<Completion> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmRejected(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = WireRequest::from_request(request, self.max_tokens);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completion request failed: {}", e);
                OrchestrationError::LlmError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Chat completion error response: {}", error_text);
            let message = format!("provider returned {}: {}", status, error_text);
            return Err(if is_transient_status(status) {
                OrchestrationError::LlmError(message)
            } else {
                OrchestrationError::LlmRejected(message)
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            OrchestrationError::LlmRejected(format!("response parse error: {}", e))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            OrchestrationError::LlmRejected("provider returned no choices".to_string())
        })?;

        let calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            tool_calls = calls.len(),
            "Chat completion received"
        );

        if calls.is_empty() {
            Ok(Completion::Message(choice.message.content.unwrap_or_default()))
        } else {
            Ok(Completion::ToolCalls {
                content: choice.message.content.filter(|c| !c.trim().is_empty()),
                calls,
            })
        }
    }
}

/// Statuses another attempt can fix: server errors, throttling and timeouts
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a CompletionRequest, max_tokens: u32) -> Self {
        let messages = request
            .messages
            .iter()
            .map(|msg| WireMessage {
                role: msg.role,
                content: msg.content.as_deref(),
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: &call.id,
                        kind: "function",
                        function: WireFunctionCall {
                            name: &call.name,
                            arguments: &call.arguments,
                        },
                    })
                    .collect(),
                tool_call_id: msg.tool_call_id.as_deref(),
            })
            .collect();

        let tools: Vec<WireTool<'a>> = request
            .tools
            .iter()
            .map(|schema| WireTool {
                kind: "function",
                function: WireFunctionSchema {
                    name: &schema.name,
                    description: &schema.description,
                    parameters: &schema.parameters,
                },
            })
            .collect();

        let tool_choice = if tools.is_empty() { None } else { Some("auto") };

        Self {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens,
            tools,
            tool_choice,
            response_format: request.json_response.then(|| ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSchema<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionSchema<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}
