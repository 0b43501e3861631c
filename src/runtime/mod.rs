//! Agent runtime
//!
//! Runs one plan step: a bounded loop of model calls where every requested
//! tool call is authorized against the agent's binding, executed with the
//! retry policy, recorded in the trace and fed back to the model.
//!
//! `run_step` never fails. Whatever goes wrong inside a step ends up as a
//! degraded [`AgentOutput`] plus the error that caused it.

use crate::config::Config;
use crate::error::{OrchestrationError, ToolError};
use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient, ToolCall};
use crate::models::{AgentContexts, AgentId, AgentOutput, ToolCallOutcome, ToolCallRecord, UserContexts};
use crate::prompts::{build_context_prompt, PromptLibrary};
use crate::tools::{Tool, ToolRegistry};
use crate::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

pub mod retry;

const TOOL_SUMMARY_CHARS: usize = 300;

/// Everything a step needs to know about the turn so far
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub agent: AgentId,
    pub description: &'a str,
    pub user_message: &'a str,
    pub user: &'a UserContexts,
    pub agents: &'a AgentContexts,
}

/// Output of a step plus the error that degraded it, if any
#[derive(Debug)]
pub struct StepReport {
    pub output: AgentOutput,
    pub failure: Option<OrchestrationError>,
}

impl StepReport {
    pub fn loop_exceeded(&self) -> bool {
        matches!(self.failure, Some(OrchestrationError::ToolLoopExceeded { .. }))
    }
}

/// Mutable state of one step's loop
struct StepState {
    agent: AgentId,
    trace: Vec<ToolCallRecord>,
    last_text: Option<String>,
    fallback_tools: Vec<&'static str>,
    /// Tools whose retryable failure outlasted the retry budget
    exhausted_tools: Vec<&'static str>,
}

impl StepState {
    /// Reason the step is degraded even though its loop finished
    fn degraded_reason(&self) -> Option<String> {
        let mut reasons = Vec::new();
        if !self.exhausted_tools.is_empty() {
            reasons.push(format!(
                "data source unavailable after retry: {}",
                self.exhausted_tools.join(", ")
            ));
        }
        if !self.fallback_tools.is_empty() {
            reasons.push(format!(
                "fallback payload used for {}",
                self.fallback_tools.join(", ")
            ));
        }
        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }

    /// Best partial answer: the model's last text, else the tool results
    fn partial_answer(&self) -> String {
        if let Some(text) = self.last_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return text.to_string();
        }

        let gathered: Vec<String> = self
            .trace
            .iter()
            .filter_map(|record| match &record.outcome {
                ToolCallOutcome::Success { payload } => {
                    let rendered = payload.to_string();
                    let preview: String = rendered.chars().take(TOOL_SUMMARY_CHARS).collect();
                    Some(format!("- {}: {}", record.tool, preview))
                }
                _ => None,
            })
            .collect();

        if gathered.is_empty() {
            format!(
                "{}: 요청을 처리하는 중 문제가 발생해 충분한 정보를 얻지 못했습니다.",
                self.agent.persona()
            )
        } else {
            format!("{}가 수집한 정보입니다.\n{}", self.agent.persona(), gathered.join("\n"))
        }
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<PromptLibrary>,
    config: Arc<Config>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        prompts: Arc<PromptLibrary>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            llm,
            tools,
            prompts,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute one plan step with the agent's tools
    pub async fn run_step(&self, request: StepRequest<'_>) -> StepReport {
        let agent = request.agent;
        let step_index = request.agents.current_step;
        let total_steps = request.agents.total_step;
        let max_iterations = self.config.runtime.max_tool_iterations;
        let start = Instant::now();

        info!(agent = %agent, step = step_index + 1, total = total_steps, "Step started");

        let system = build_context_prompt(self.prompts.template(agent), request.user, request.agents);
        let mut messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(step_message(request.description, request.user_message)),
        ];
        let schemas = self.tools.schemas_for(agent);

        let mut state = StepState {
            agent,
            trace: Vec::new(),
            last_text: None,
            fallback_tools: Vec::new(),
            exhausted_tools: Vec::new(),
        };

        let mut failure = None;
        let mut answer = None;

        for iteration in 0..max_iterations {
            let completion_request = CompletionRequest::new(
                self.config.model_for(agent),
                self.config.temperature_for(agent),
                messages.clone(),
            )
            .with_tools(schemas.clone());

            // -------------------------------------------------
            // Model call (timeout + retry, then degrade)
            // -------------------------------------------------
            let completion = match self.complete_with_retry(&completion_request).await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(agent = %agent, error = %e, "Model unavailable, degrading step");
                    answer = Some(state.last_text.clone().unwrap_or_else(|| {
                        format!(
                            "{}가 지금 응답할 수 없습니다. 잠시 후 다시 시도해주세요.",
                            agent.persona()
                        )
                    }));
                    failure = Some(e);
                    break;
                }
            };

            let (content, calls) = match completion {
                Completion::Message(text) => {
                    debug!(agent = %agent, iteration, "Final answer received");
                    answer = Some(text);
                    break;
                }
                Completion::ToolCalls { content, calls } => (content, calls),
            };

            if let Some(text) = content.as_ref().filter(|t| !t.trim().is_empty()) {
                state.last_text = Some(text.clone());
            }
            messages.push(ChatMessage::assistant_tool_calls(content, calls.clone()));

            // -------------------------------------------------
            // Tool calls
            // -------------------------------------------------
            let mut rejected = None;
            for call in &calls {
                match self.handle_tool_call(&mut state, call).await {
                    Ok(tool_message) => messages.push(tool_message),
                    Err(e) => {
                        rejected = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = rejected {
                warn!(agent = %agent, error = %e, "Step degraded by unauthorized tool call");
                answer = Some(state.partial_answer());
                failure = Some(e);
                break;
            }
        }

        let output_text = match answer {
            Some(text) if !text.trim().is_empty() => text,
            Some(_) => state.partial_answer(),
            None => {
                warn!(agent = %agent, max_iterations, "Tool-call loop exhausted");
                failure = Some(OrchestrationError::ToolLoopExceeded {
                    agent,
                    iterations: max_iterations,
                });
                state.partial_answer()
            }
        };

        let degraded_reason = match &failure {
            Some(e) => Some(e.to_string()),
            None => state.degraded_reason(),
        };

        info!(
            agent = %agent,
            step = step_index + 1,
            tool_calls = state.trace.len(),
            degraded = degraded_reason.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Step finished"
        );

        StepReport {
            output: AgentOutput {
                agent,
                step_index,
                progress_description: format!("{}: {}", agent.persona(), request.description),
                output: output_text,
                final_output: step_index + 1 == total_steps,
                degraded: degraded_reason.is_some(),
                degraded_reason,
                trace: state.trace,
            },
            failure,
        }
    }

    /// Authorize, execute and record one tool call.
    ///
    /// Returns the tool message for the model, or `UnauthorizedTool` when the
    /// step has to stop.
    async fn handle_tool_call(&self, state: &mut StepState, call: &ToolCall) -> Result<ChatMessage> {
        let agent = state.agent;
        let start = Instant::now();

        let tool = match self.tools.get(&call.name) {
            Some(tool) if agent.can_use_tool(&call.name) => tool,
            _ => {
                state.trace.push(ToolCallRecord {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    arguments: parse_arguments(&call.arguments).unwrap_or(Value::Null),
                    attempts: 0,
                    outcome: ToolCallOutcome::Rejected {
                        reason: format!("'{}' is not bound to {}", call.name, agent),
                    },
                    degraded: false,
                    elapsed_ms: 0,
                });
                return Err(OrchestrationError::UnauthorizedTool {
                    agent,
                    tool: call.name.clone(),
                });
            }
        };

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                debug!(tool = %call.name, "Malformed tool arguments");
                return Ok(self.record_failure(state, call, Value::Null, 0, start, &e));
            }
        };

        let (result, attempts) = self.execute_tool(tool.as_ref(), &arguments).await;

        match result {
            Ok(payload) => {
                debug!(tool = %call.name, attempts, "Tool call succeeded");
                let content = payload.to_string();
                state.trace.push(ToolCallRecord {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    arguments,
                    attempts,
                    outcome: ToolCallOutcome::Success { payload },
                    degraded: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
                Ok(ChatMessage::tool(&call.id, content))
            }
            Err(e) => {
                let fallback = if e.is_retryable() { tool.degraded(&arguments) } else { None };

                match fallback {
                    Some(payload) => {
                        warn!(tool = %call.name, attempts, error = %e, "Using degraded tool payload");
                        state.fallback_tools.push(tool.name());
                        let content = payload.to_string();
                        state.trace.push(ToolCallRecord {
                            call_id: call.id.clone(),
                            tool: call.name.clone(),
                            arguments,
                            attempts,
                            outcome: ToolCallOutcome::Success { payload },
                            degraded: true,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                        });
                        Ok(ChatMessage::tool(&call.id, content))
                    }
                    None => {
                        warn!(tool = %call.name, attempts, error = %e, "Tool call failed");
                        if e.is_retryable() {
                            state.exhausted_tools.push(tool.name());
                        }
                        Ok(self.record_failure(state, call, arguments, attempts, start, &e))
                    }
                }
            }
        }
    }

    fn record_failure(
        &self,
        state: &mut StepState,
        call: &ToolCall,
        arguments: Value,
        attempts: u32,
        start: Instant,
        error: &ToolError,
    ) -> ChatMessage {
        state.trace.push(ToolCallRecord {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            arguments,
            attempts,
            outcome: ToolCallOutcome::Failed {
                kind: error.kind().to_string(),
                error: error.to_string(),
            },
            degraded: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
        ChatMessage::tool(&call.id, error.to_tool_payload().to_string())
    }

    /// Run a tool under the per-call timeout, retrying retryable failures.
    /// Returns the result and the number of attempts made.
    async fn execute_tool(&self, tool: &dyn Tool, arguments: &Value) -> (std::result::Result<Value, ToolError>, u32) {
        let attempts = AtomicU32::new(0);
        let timeout = self.config.runtime.tool_timeout;
        let strategy = retry::backoff(self.config.runtime.retry_backoff, self.config.runtime.retry_budget);

        let result = RetryIf::spawn(
            strategy,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    match tokio::time::timeout(timeout, tool.execute(arguments)).await {
                        Ok(result) => result,
                        Err(_) => Err(ToolError::DataSourceUnavailable(format!(
                            "{} timed out after {}s",
                            tool.name(),
                            timeout.as_secs_f32()
                        ))),
                    }
                }
            },
            |e: &ToolError| {
                let retry = e.is_retryable();
                if retry {
                    warn!(tool = tool.name(), error = %e, "Retryable tool failure");
                }
                retry
            },
        )
        .await;

        (result, attempts.load(Ordering::SeqCst))
    }

    /// Model call under the configured timeout, retried once on a transient failure
    async fn complete_with_retry(&self, request: &CompletionRequest) -> Result<Completion> {
        let timeout = self.config.llm.timeout;
        let strategy = retry::backoff(self.config.runtime.retry_backoff, self.config.runtime.retry_budget);

        RetryIf::spawn(
            strategy,
            || async move {
                match tokio::time::timeout(timeout, self.llm.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(OrchestrationError::LlmError(format!(
                        "model call timed out after {}s",
                        timeout.as_secs_f32()
                    ))),
                }
            },
            |e: &OrchestrationError| {
                let retry = e.is_retryable();
                if retry {
                    warn!(error = %e, "Model call failed, retrying");
                }
                retry
            },
        )
        .await
    }

    /// Merge the step outputs into one answer with the conversational agent
    pub async fn summarize(&self, user_message: &str, outputs: &[AgentOutput]) -> Result<String> {
        let agent = AgentId::Conversational;
        let findings: Vec<String> = outputs
            .iter()
            .map(|o| format!("[{} / {}]\n{}", o.agent, o.progress_description, o.output))
            .collect();

        let request = CompletionRequest::new(
            self.config.model_for(agent),
            self.config.temperature_for(agent),
            vec![
                ChatMessage::system(format!(
                    "{}\n\n아래 에이전트들의 작업 결과를 하나의 답변으로 정리하세요. 결과에 없는 사실은 추가하지 마세요.",
                    self.prompts.template(agent).trim_end()
                )),
                ChatMessage::user(format!(
                    "사용자 요청: {}\n\n{}",
                    user_message,
                    findings.join("\n\n")
                )),
            ],
        );

        match self.complete_with_retry(&request).await? {
            Completion::Message(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(OrchestrationError::LlmError(
                "summarization produced no text".to_string(),
            )),
        }
    }
}

fn step_message(description: &str, user_message: &str) -> String {
    format!("작업: {}\n\n사용자 요청: {}", description, user_message)
}

/// Tool arguments as a JSON object; an empty string means no arguments
fn parse_arguments(raw: &str) -> std::result::Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Plan, PlanStep};
    use crate::test_support::{
        prompt_library, test_config, text, tool_call, tool_calls, FlakyTool, ScriptStep, ScriptedLlm,
    };
    use crate::tools::names;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        llm: Arc<ScriptedLlm>,
        runtime: AgentRuntime,
    }

    fn harness(llm: ScriptedLlm, tools: Vec<Arc<dyn Tool>>, config: Config) -> Harness {
        let llm = Arc::new(llm);
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        let runtime = AgentRuntime::new(
            llm.clone(),
            Arc::new(registry),
            Arc::new(prompt_library()),
            Arc::new(config),
        );
        Harness { llm, runtime }
    }

    async fn run(harness: &Harness, agent: AgentId) -> StepReport {
        let plan = Plan::new(vec![PlanStep::new(agent, "시장 상황 확인")]);
        let agents = AgentContexts::for_plan(&plan);
        let mut user = UserContexts::default();
        user.add_user_message("KOSPI 오늘 어때?");

        harness
            .runtime
            .run_step(StepRequest {
                agent,
                description: "시장 상황 확인",
                user_message: "KOSPI 오늘 어때?",
                user: &user,
                agents: &agents,
            })
            .await
    }

    #[tokio::test]
    async fn test_tool_result_is_fed_back() {
        let indicators = Arc::new(
            FlakyTool::new(names::GET_MARKET_INDICATORS, 0, ToolError::NotFound(String::new()))
                .with_payload(json!([{"indicator": "KOSPI", "current_value": 2650.1}])),
        );
        let h = harness(
            ScriptedLlm::new(vec![
                tool_call(names::GET_MARKET_INDICATORS, json!({})),
                text("KOSPI는 2650선입니다."),
            ]),
            vec![indicators.clone()],
            test_config(),
        );

        let report = run(&h, AgentId::Trend).await;
        assert!(report.failure.is_none());
        assert_eq!(report.output.output, "KOSPI는 2650선입니다.");
        assert!(report.output.final_output);
        assert!(!report.output.degraded);
        assert_eq!(report.output.trace.len(), 1);
        assert!(report.output.trace[0].succeeded());

        let requests = h.llm.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        let tool_message = requests[1].messages.last().unwrap();
        assert!(tool_message.content.as_deref().unwrap().contains("2650.1"));
    }

    #[tokio::test]
    async fn test_unbound_tool_degrades_step() {
        let price = Arc::new(FlakyTool::new(names::GET_STOCK_PRICE, 0, ToolError::NotFound(String::new())));
        let h = harness(
            ScriptedLlm::new(vec![tool_call(names::GET_STOCK_PRICE, json!({"stock_code": "005930"}))]),
            vec![price.clone()],
            test_config(),
        );

        let report = run(&h, AgentId::Trend).await;
        assert!(matches!(report.failure, Some(OrchestrationError::UnauthorizedTool { .. })));
        assert!(report.output.degraded);
        assert_eq!(price.calls(), 0);
        assert!(matches!(report.output.trace[0].outcome, ToolCallOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_retryable_failure_retried_once() {
        let flaky = Arc::new(FlakyTool::new(
            names::GET_MARKET_INDICATORS,
            2,
            ToolError::DataSourceUnavailable("connection reset".to_string()),
        ));
        let h = harness(
            ScriptedLlm::new(vec![
                tool_call(names::GET_MARKET_INDICATORS, json!({})),
                text("지표를 불러오지 못했습니다."),
            ]),
            vec![flaky.clone()],
            test_config(),
        );

        let report = run(&h, AgentId::Trend).await;
        assert_eq!(flaky.calls(), 2);
        let record = &report.output.trace[0];
        assert_eq!(record.attempts, 2);
        assert!(matches!(record.outcome, ToolCallOutcome::Failed { ref kind, .. } if kind == "data_source_unavailable"));
        assert!(report.failure.is_none());
        assert!(report.output.degraded);
        assert_eq!(
            report.output.degraded_reason.as_deref(),
            Some("data source unavailable after retry: get_market_indicators")
        );

        let requests = h.llm.requests().await;
        let fed_back = requests[1].messages.last().unwrap().content.clone().unwrap();
        assert!(fed_back.contains("\"retryable\":true"));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let lookup = Arc::new(FlakyTool::new(
            names::SEARCH_STOCK_CODE,
            1,
            ToolError::NotFound("없는회사".to_string()),
        ));
        let h = harness(
            ScriptedLlm::new(vec![
                tool_call(names::SEARCH_STOCK_CODE, json!({"company_name": "없는회사"})),
                text("해당 종목을 찾지 못했습니다."),
            ]),
            vec![lookup.clone()],
            test_config(),
        );

        let report = run(&h, AgentId::StockAnalyst).await;
        assert_eq!(lookup.calls(), 1);
        assert_eq!(report.output.trace[0].attempts, 1);
        assert!(!report.output.degraded);
    }

    #[tokio::test]
    async fn test_generative_fallback_after_retry() {
        let scenarios = Arc::new(
            FlakyTool::new(names::GENERATE_SCENARIOS, 5, ToolError::Generation("bad json".to_string()))
                .with_fallback(json!([{"scenario_name": "금리 인상 시나리오"}])),
        );
        let h = harness(
            ScriptedLlm::new(vec![
                tool_call(names::GENERATE_SCENARIOS, json!({"portfolio_stocks": "005930"})),
                text("금리 인상 시나리오를 기준으로 보면..."),
            ]),
            vec![scenarios.clone()],
            test_config(),
        );

        let report = run(&h, AgentId::Simulator).await;
        assert_eq!(scenarios.calls(), 2);
        assert!(report.output.degraded);
        assert!(report.failure.is_none());
        assert!(report.output.trace[0].degraded);
        assert!(report.output.trace[0].succeeded());
    }

    #[tokio::test]
    async fn test_malformed_arguments_fed_back() {
        let price = Arc::new(FlakyTool::new(names::GET_STOCK_PRICE, 0, ToolError::NotFound(String::new())));
        let malformed = Completion::ToolCalls {
            content: None,
            calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: names::GET_STOCK_PRICE.to_string(),
                arguments: "{\"stock_code\": ".to_string(),
            }],
        };
        let h = harness(
            ScriptedLlm::new(vec![malformed, text("다시 시도하겠습니다.")]),
            vec![price.clone()],
            test_config(),
        );

        let report = run(&h, AgentId::StockAnalyst).await;
        assert_eq!(price.calls(), 0);
        assert!(matches!(
            report.output.trace[0].outcome,
            ToolCallOutcome::Failed { ref kind, .. } if kind == "invalid_arguments"
        ));
    }

    #[tokio::test]
    async fn test_loop_exhaustion_returns_partial_answer() {
        let indicators = Arc::new(FlakyTool::new(names::GET_MARKET_INDICATORS, 0, ToolError::NotFound(String::new())));
        let mut config = test_config();
        config.runtime.max_tool_iterations = 3;

        let h = harness(
            ScriptedLlm::new(vec![]).repeating(tool_call(names::GET_MARKET_INDICATORS, json!({}))),
            vec![indicators.clone()],
            config,
        );

        let report = run(&h, AgentId::Trend).await;
        assert!(report.loop_exceeded());
        assert!(report.output.degraded);
        assert_eq!(indicators.calls(), 3);
        assert_eq!(h.llm.call_count().await, 3);
        assert!(report.output.output.contains(names::GET_MARKET_INDICATORS));
    }

    #[tokio::test]
    async fn test_model_failure_retried_then_degrades() {
        let h = harness(
            ScriptedLlm::from_steps(vec![
                ScriptStep::Fail("503".to_string()),
                ScriptStep::Fail("503".to_string()),
            ]),
            vec![],
            test_config(),
        );

        let report = run(&h, AgentId::Conversational).await;
        assert_eq!(h.llm.call_count().await, 2);
        assert!(matches!(report.failure, Some(OrchestrationError::LlmError(_))));
        assert!(report.output.degraded);
        assert!(report.output.output.contains("비비"));
    }

    #[tokio::test]
    async fn test_rejected_model_call_is_not_retried() {
        let h = harness(
            ScriptedLlm::from_steps(vec![
                ScriptStep::Reject("provider returned 401 Unauthorized".to_string()),
                ScriptStep::Reply(text("안녕하세요!")),
            ]),
            vec![],
            test_config(),
        );

        let report = run(&h, AgentId::Conversational).await;
        assert_eq!(h.llm.call_count().await, 1);
        assert!(matches!(report.failure, Some(OrchestrationError::LlmRejected(_))));
        assert!(report.output.degraded);
    }

    #[tokio::test]
    async fn test_model_recovers_on_retry() {
        let h = harness(
            ScriptedLlm::from_steps(vec![
                ScriptStep::Fail("timeout".to_string()),
                ScriptStep::Reply(text("안녕하세요!")),
            ]),
            vec![],
            test_config(),
        );

        let report = run(&h, AgentId::Conversational).await;
        assert!(report.failure.is_none());
        assert_eq!(report.output.output, "안녕하세요!");
    }

    #[tokio::test]
    async fn test_tool_timeout_maps_to_unavailable() {
        let slow = Arc::new(
            FlakyTool::new(names::GET_LATEST_NEWS, 0, ToolError::NotFound(String::new()))
                .with_delay(Duration::from_millis(200)),
        );
        let mut config = test_config();
        config.runtime.tool_timeout = Duration::from_millis(20);

        let h = harness(
            ScriptedLlm::new(vec![
                tool_calls(&[(names::GET_LATEST_NEWS, json!({}))]),
                text("뉴스를 가져오지 못했습니다."),
            ]),
            vec![slow.clone()],
            config,
        );

        let report = run(&h, AgentId::Trend).await;
        assert_eq!(slow.calls(), 2);
        assert!(report.output.degraded);
        assert!(matches!(
            report.output.trace[0].outcome,
            ToolCallOutcome::Failed { ref kind, .. } if kind == "data_source_unavailable"
        ));
    }

    #[tokio::test]
    async fn test_summarize_uses_conversational_agent() {
        let h = harness(ScriptedLlm::new(vec![text("종합하면 시장은 보합입니다.")]), vec![], test_config());
        let outputs = vec![AgentOutput {
            agent: AgentId::Trend,
            step_index: 0,
            progress_description: "키키: 시장 확인".to_string(),
            output: "KOSPI 보합".to_string(),
            final_output: true,
            degraded: false,
            degraded_reason: None,
            trace: vec![],
        }];

        let summary = h.runtime.summarize("KOSPI 오늘 어때?", &outputs).await.unwrap();
        assert_eq!(summary, "종합하면 시장은 보합입니다.");

        let requests = h.llm.requests().await;
        assert!(requests[0].messages[0].content.as_deref().unwrap().contains("비비"));
        assert!(requests[0].messages[1].content.as_deref().unwrap().contains("KOSPI 보합"));
    }
}
