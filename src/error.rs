//! Error types for the multi-agent advisor

use crate::models::AgentId;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Turn-fatal Errors
    // =============================

    #[error("Plan generation error: {0}")]
    PlanGeneration(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    // =============================
    // Step-level Errors
    // =============================

    #[error("Agent '{agent}' is not authorized to call tool '{tool}'")]
    UnauthorizedTool { agent: AgentId, tool: String },

    #[error("Agent '{agent}' exceeded {iterations} tool-call iterations")]
    ToolLoopExceeded { agent: AgentId, iterations: usize },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM request rejected: {0}")]
    LlmRejected(String),

    // =============================
    // Session / Configuration Errors
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A turn is already in progress for session {0}")]
    TurnInProgress(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Turn cancelled")]
    Cancelled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Turn task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}

impl OrchestrationError {
    /// Errors that end the whole turn rather than a single step
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::PlanGeneration(_)
                | OrchestrationError::InvalidPlan(_)
                | OrchestrationError::Cancelled
        )
    }

    /// Model failures worth another attempt: transport errors, provider
    /// 5xx/429 responses and timeouts
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestrationError::LlmError(_))
    }
}

/// Failure returned by a tool adapter.
///
/// Adapters never see the orchestrator; the agent runtime decides from
/// [`ToolError::is_retryable`] whether a failed call gets its single retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::DataSourceUnavailable(_) | ToolError::Generation(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::DataSourceUnavailable(_) => "data_source_unavailable",
            ToolError::NotFound(_) => "not_found",
            ToolError::Generation(_) => "generation_error",
            ToolError::InvalidArguments(_) => "invalid_arguments",
        }
    }

    /// JSON payload fed back to the model as the tool message
    pub fn to_tool_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "retryable": self.is_retryable(),
        })
    }
}
