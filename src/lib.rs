//! Multi-agent financial advisor
//!
//! A manager agent turns each user message into a short plan of
//! (agent, sub-task) steps. The orchestrator runs the steps in order, each
//! agent working through a bounded tool-calling loop over market data
//! adapters, and returns the last step's output as the reply.
//!
//! TURN LOOP:
//! PLANNING → EXECUTING(1..n) → INTEGRATING → DONE (or ABORTED)

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod runtime;
pub mod session;
pub mod test_support;
pub mod tools;

pub use error::{OrchestrationError, Result, ToolError};

// Re-export common types
pub use models::*;
