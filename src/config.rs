//! Runtime configuration
//!
//! Everything is resolved from the process environment (after loading `.env`).
//! `Config::from_lookup` takes any key lookup so tests never touch the real
//! environment.

use crate::error::OrchestrationError;
use crate::models::AgentId;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// How the final user-facing response is produced from the step outputs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStrategy {
    #[default]
    LastOutput,
    Summarize,
}

impl FromStr for IntegrationStrategy {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "last_output" | "last-output" | "passthrough" => Ok(IntegrationStrategy::LastOutput),
            "summarize" | "summary" => Ok(IntegrationStrategy::Summarize),
            other => Err(OrchestrationError::Config(format!(
                "INTEGRATION_MODE must be 'last_output' or 'summarize', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Model/temperature override for a single agent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOverride {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

/// Knobs of the per-step tool-calling loop
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub max_tool_iterations: usize,
    pub tool_timeout: Duration,
    pub retry_backoff: Duration,
    /// Retries granted to a retryable tool or model failure
    pub retry_budget: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            tool_timeout: Duration::from_secs(20),
            retry_backoff: Duration::from_millis(1000),
            retry_budget: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmSettings,
    pub runtime: RuntimeSettings,
    pub agent_overrides: HashMap<AgentId, AgentOverride>,
    pub prompts_dir: PathBuf,
    pub market_data_base_url: Option<String>,
    pub integration: IntegrationStrategy,
    pub max_plan_steps: usize,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            runtime: RuntimeSettings::default(),
            agent_overrides: HashMap::new(),
            prompts_dir: PathBuf::from("prompts"),
            market_data_base_url: None,
            integration: IntegrationStrategy::LastOutput,
            max_plan_steps: 3,
            api_port: 8080,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and resolve from the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Config::default();

        let llm = LlmSettings {
            api_key: get("OPENAI_API_KEY").unwrap_or_default(),
            base_url: get("LLM_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.llm.base_url),
            model: get("LLM_MODEL").unwrap_or(defaults.llm.model),
            temperature: parse_or("LLM_TEMPERATURE", get("LLM_TEMPERATURE"), defaults.llm.temperature)?,
            max_tokens: parse_or("LLM_MAX_TOKENS", get("LLM_MAX_TOKENS"), defaults.llm.max_tokens)?,
            timeout: Duration::from_secs(parse_or(
                "LLM_TIMEOUT_SECS",
                get("LLM_TIMEOUT_SECS"),
                defaults.llm.timeout.as_secs(),
            )?),
        };

        let runtime = RuntimeSettings {
            max_tool_iterations: parse_or(
                "MAX_TOOL_ITERATIONS",
                get("MAX_TOOL_ITERATIONS"),
                defaults.runtime.max_tool_iterations,
            )?,
            tool_timeout: Duration::from_secs(parse_or(
                "TOOL_TIMEOUT_SECS",
                get("TOOL_TIMEOUT_SECS"),
                defaults.runtime.tool_timeout.as_secs(),
            )?),
            retry_backoff: Duration::from_millis(parse_or(
                "TOOL_RETRY_BACKOFF_MS",
                get("TOOL_RETRY_BACKOFF_MS"),
                defaults.runtime.retry_backoff.as_millis() as u64,
            )?),
            retry_budget: defaults.runtime.retry_budget,
        };

        if runtime.max_tool_iterations == 0 {
            return Err(OrchestrationError::Config(
                "MAX_TOOL_ITERATIONS must be at least 1".to_string(),
            ));
        }

        let mut agent_overrides = HashMap::new();
        for agent in AgentId::ALL {
            let model_key = format!("AGENT_{}_MODEL", agent.env_key());
            let temperature_key = format!("AGENT_{}_TEMPERATURE", agent.env_key());

            let model = get(&model_key);
            let temperature = match get(&temperature_key) {
                Some(raw) => Some(parse_value::<f32>(&temperature_key, &raw)?),
                None => None,
            };

            if model.is_some() || temperature.is_some() {
                agent_overrides.insert(agent, AgentOverride { model, temperature });
            }
        }

        let integration = match get("INTEGRATION_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.integration,
        };

        let max_plan_steps = parse_or("MAX_PLAN_STEPS", get("MAX_PLAN_STEPS"), defaults.max_plan_steps)?;
        if max_plan_steps == 0 {
            return Err(OrchestrationError::Config(
                "MAX_PLAN_STEPS must be at least 1".to_string(),
            ));
        }

        let api_port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => defaults.api_port,
        };

        Ok(Self {
            llm,
            runtime,
            agent_overrides,
            prompts_dir: get("PROMPTS_DIR").map(PathBuf::from).unwrap_or(defaults.prompts_dir),
            market_data_base_url: get("MARKET_DATA_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            integration,
            max_plan_steps,
            api_port,
        })
    }

    /// Model used for an agent, honouring its override
    pub fn model_for(&self, agent: AgentId) -> &str {
        self.agent_overrides
            .get(&agent)
            .and_then(|o| o.model.as_deref())
            .unwrap_or(&self.llm.model)
    }

    pub fn temperature_for(&self, agent: AgentId) -> f32 {
        self.agent_overrides
            .get(&agent)
            .and_then(|o| o.temperature)
            .unwrap_or(self.llm.temperature)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        OrchestrationError::Config(format!("{} has an invalid value: '{}'", key, raw))
    })
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
