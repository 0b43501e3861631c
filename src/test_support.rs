//! Test doubles: a scripted model, in-memory data sources and flaky tools.
//!
//! Used by the unit tests and the `tests/` suite.

use crate::config::Config;
use crate::error::{OrchestrationError, ToolError};
use crate::prompts::PromptLibrary;
use crate::llm::{Completion, CompletionRequest, LlmClient, ToolCall};
use crate::tools::data::{
    CompanyDirectory, CompanyProfile, DailyBar, DataSources, Listing, MarketData, NewsFeed, NewsItem,
};
use crate::tools::{Tool, ToolResult};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ===== Scripted model =====

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(Completion),
    /// Transient failure, retried by the callers
    Fail(String),
    /// Provider rejected the request outright
    Reject(String),
    /// Reply after a delay, for timeout paths
    Delayed(Duration, Completion),
}

/// Model double that replays a fixed script and records every request
pub struct ScriptedLlm {
    script: Mutex<VecDeque<ScriptStep>>,
    repeat: Option<Completion>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Completion>) -> Self {
        Self::from_steps(replies.into_iter().map(ScriptStep::Reply).collect())
    }

    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply used once the script is exhausted
    pub fn repeating(mut self, reply: Completion) -> Self {
        self.repeat = Some(reply);
        self
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> crate::Result<Completion> {
        self.requests.lock().await.push(request.clone());

        let step = self.script.lock().await.pop_front();
        match step {
            Some(ScriptStep::Reply(reply)) => Ok(reply),
            Some(ScriptStep::Fail(message)) => Err(OrchestrationError::LlmError(message)),
            Some(ScriptStep::Reject(message)) => Err(OrchestrationError::LlmRejected(message)),
            Some(ScriptStep::Delayed(delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            None => self
                .repeat
                .clone()
                .ok_or_else(|| OrchestrationError::LlmError("script exhausted".to_string())),
        }
    }
}

/// Final text answer
pub fn text(content: &str) -> Completion {
    Completion::Message(content.to_string())
}

/// A single tool call request
pub fn tool_call(name: &str, args: Value) -> Completion {
    tool_calls(&[(name, args)])
}

pub fn tool_calls(calls: &[(&str, Value)]) -> Completion {
    Completion::ToolCalls {
        content: None,
        calls: calls
            .iter()
            .enumerate()
            .map(|(i, (name, args))| ToolCall::new(format!("call_{}_{}", name, i), *name, args.clone()))
            .collect(),
    }
}

/// Manager reply in the planning JSON shape
pub fn plan_reply(steps: &[(&str, &str)]) -> Completion {
    let plans: Vec<Value> = steps
        .iter()
        .map(|(agent, description)| {
            json!({"agent_name": agent, "description": description, "tool_recommendation": []})
        })
        .collect();

    Completion::Message(
        json!({"total_steps": steps.len(), "plans": plans, "mode": "agent"}).to_string(),
    )
}

// ===== Configuration =====

/// Defaults with millisecond backoff and short timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.timeout = Duration::from_secs(2);
    config.runtime.tool_timeout = Duration::from_secs(2);
    config.runtime.retry_backoff = Duration::from_millis(1);
    config
}

/// One-line template per agent
pub fn prompt_library() -> PromptLibrary {
    PromptLibrary::from_fn(|agent| format!("You are {} ({}).", agent.persona(), agent))
}

// ===== In-memory data sources =====

/// Consecutive daily bars with flat OHLC and volume 1000
pub fn bars_from_closes(closes: &[f64]) -> Vec<DailyBar> {
    let start = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| DailyBar {
            date: start + ChronoDuration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000,
        })
        .collect()
}

/// Market data served from maps; unknown symbols are `NotFound`
#[derive(Default, Clone)]
pub struct StubMarketData {
    bars: HashMap<String, Vec<DailyBar>>,
    listings: Vec<Listing>,
    news: Vec<NewsItem>,
    companies: HashMap<String, CompanyProfile>,
    unavailable: bool,
}

impl StubMarketData {
    pub fn with_bars(mut self, symbol: &str, bars: Vec<DailyBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_listing(mut self, code: &str, name: &str, market: &str) -> Self {
        self.listings.push(Listing {
            code: code.to_string(),
            name: name.to_string(),
            market: market.to_string(),
        });
        self
    }

    pub fn with_news(mut self, title: &str, info: &str) -> Self {
        self.news.push(NewsItem {
            title: title.to_string(),
            info: info.to_string(),
        });
        self
    }

    pub fn with_company(mut self, code: &str, name: &str) -> Self {
        self.companies.insert(
            code.to_string(),
            CompanyProfile {
                code: code.to_string(),
                name: name.to_string(),
                financial_summary: json!({"revenue": "300조", "operating_margin": "10%"}),
                industry_comparison: json!({"per": 12.5}),
            },
        );
        self
    }

    /// Every call fails with `DataSourceUnavailable`
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn into_sources(self) -> DataSources {
        let shared = Arc::new(self);
        DataSources {
            market: shared.clone(),
            news: shared.clone(),
            companies: shared,
        }
    }

    fn check(&self) -> Result<(), ToolError> {
        if self.unavailable {
            Err(ToolError::DataSourceUnavailable("stub source is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketData for StubMarketData {
    async fn daily_bars(&self, symbol: &str, _days: u32) -> Result<Vec<DailyBar>, ToolError> {
        self.check()?;
        self.bars
            .get(symbol)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(format!("bars/{} not found", symbol)))
    }

    async fn listings(&self) -> Result<Vec<Listing>, ToolError> {
        self.check()?;
        Ok(self.listings.clone())
    }
}

#[async_trait]
impl NewsFeed for StubMarketData {
    async fn latest(&self, limit: usize) -> Result<Vec<NewsItem>, ToolError> {
        self.check()?;
        Ok(self.news.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl CompanyDirectory for StubMarketData {
    async fn company_profile(&self, code: &str) -> Result<CompanyProfile, ToolError> {
        self.check()?;
        self.companies
            .get(code)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(format!("companies/{} not found", code)))
    }
}

// ===== Flaky tool =====

/// Tool that fails a fixed number of times before succeeding
pub struct FlakyTool {
    name: &'static str,
    failures: usize,
    error: ToolError,
    payload: Value,
    fallback: Option<Value>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FlakyTool {
    pub fn new(name: &'static str, failures: usize, error: ToolError) -> Self {
        Self {
            name,
            failures,
            error,
            payload: json!({"ok": true}),
            fallback: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Sleep before every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Test tool with scripted failures"
    }

    async fn execute(&self, _args: &Value) -> ToolResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.payload.clone())
        }
    }

    fn degraded(&self, _args: &Value) -> Option<Value> {
        self.fallback.clone()
    }
}
