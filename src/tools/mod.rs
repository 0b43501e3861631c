//! Tool trait and registry
//!
//! Tools are the only way an agent touches market data. Each adapter returns
//! a JSON payload or a [`ToolError`]; retry and fallback decisions belong to
//! the agent runtime.

use crate::error::ToolError;
use crate::llm::{LlmClient, ToolSchema};
use crate::models::AgentId;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod analysis;
pub mod data;
pub mod lookup;
pub mod market;
pub mod scenario;

pub use data::{CompanyDirectory, DataSources, MarketData, MarketDataApi, NewsFeed};

/// Canonical tool names, shared by the registry and the agent binding table
pub mod names {
    pub const GET_LATEST_NEWS: &str = "get_latest_news";
    pub const GET_MAJOR_MOVERS: &str = "get_major_movers";
    pub const GET_MARKET_INDICATORS: &str = "get_market_indicators";
    pub const SEARCH_STOCK_CODE: &str = "search_stock_code";
    pub const GET_STOCK_PRICE: &str = "get_stock_price";
    pub const ANALYZE_STOCK_PATTERN: &str = "analyze_stock_pattern";
    pub const GET_COMPANY_INFO: &str = "get_company_info";
    pub const GENERATE_SCENARIOS: &str = "generate_scenarios";
}

pub type ToolResult = std::result::Result<Value, ToolError>;

/// A single callable tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, args: &Value) -> ToolResult;

    /// Simplified payload used once the retry budget is spent.
    /// Only generative tools provide one.
    fn degraded(&self, _args: &Value) -> Option<Value> {
        None
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Schemas of the registered tools an agent is bound to, in binding order
    pub fn schemas_for(&self, agent: AgentId) -> Vec<ToolSchema> {
        agent
            .bound_tools()
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| tool.schema())
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for the scenario generator's own model call
#[derive(Debug, Clone)]
pub struct ScenarioModel {
    pub model: String,
    pub temperature: f32,
}

/// Registry with all eight adapters wired to the given sources
pub fn create_default_registry(
    sources: &DataSources,
    llm: Arc<dyn LlmClient>,
    scenario_model: ScenarioModel,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(market::LatestNewsTool::new(sources.news.clone())));
    registry.register(Arc::new(market::MajorMoversTool::new(sources.market.clone())));
    registry.register(Arc::new(market::MarketIndicatorsTool::new(sources.market.clone())));
    registry.register(Arc::new(market::StockPriceTool::new(sources.market.clone())));
    registry.register(Arc::new(market::StockPatternTool::new(sources.market.clone())));

    registry.register(Arc::new(lookup::StockCodeSearchTool::new(sources.market.clone())));
    registry.register(Arc::new(lookup::CompanyInfoTool::new(sources.companies.clone())));

    registry.register(Arc::new(scenario::ScenarioTool::new(llm, scenario_model)));

    registry
}

// ===== Argument helpers =====

fn ensure_object(args: &Value) -> Result<&Map<String, Value>, ToolError> {
    args.as_object()
        .ok_or_else(|| ToolError::InvalidArguments("arguments must be a JSON object".to_string()))
}

/// Non-empty string argument
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    ensure_object(args)?
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("expected non-empty '{}'", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Six-character KRX code
pub(crate) fn stock_code_arg(args: &Value) -> Result<&str, ToolError> {
    let code = required_str(args, "stock_code")?;
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(code)
    } else {
        Err(ToolError::InvalidArguments(format!(
            "'{}' is not a 6-character stock code",
            code
        )))
    }
}

pub(crate) fn stock_code_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "stock_code": {
                "type": "string",
                "description": "6-digit KRX stock code, e.g. 005930"
            }
        },
        "required": ["stock_code"]
    })
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
