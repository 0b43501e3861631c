//! Language model abstraction
//!
//! The orchestrator only ever talks to [`LlmClient`]; the HTTP provider lives
//! in [`openai`] and tests use the scripted client from `test_support`.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod openai;
pub use openai::OpenAiClient;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

/// Function schema advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    /// Ask the provider for a JSON object response
    #[serde(default)]
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, temperature: f32, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            temperature,
            messages,
            tools: Vec::new(),
            json_response: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

/// What the model did with a request
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// A final textual answer
    Message(String),
    /// One or more tool invocations, optionally with interim text
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

impl Completion {
    pub fn text(&self) -> Option<&str> {
        match self {
            Completion::Message(text) => Some(text),
            Completion::ToolCalls { content, .. } => content.as_deref(),
        }
    }
}

/// Text / tool-calling completion provider
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool("call_1", "{\"ok\":true}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let call = ToolCall::new("call_2", "get_stock_price", serde_json::json!({"stock_code": "005930"}));
        let msg = ChatMessage::assistant_tool_calls(None, vec![call]);
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls[0].name, "get_stock_price");
        assert!(msg.tool_calls[0].arguments.contains("005930"));
    }

    #[test]
    fn test_completion_text() {
        assert_eq!(Completion::Message("hi".into()).text(), Some("hi"));
        let calls = Completion::ToolCalls { content: None, calls: vec![] };
        assert_eq!(calls.text(), None);
    }
}
