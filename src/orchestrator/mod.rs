//! Turn orchestrator
//!
//! PLANNING → EXECUTING(1..n) → INTEGRATING → DONE, with ABORTED reachable
//! from planning (bad plan), from any step boundary (cancellation) and after
//! two consecutive tool-loop exhaustions.

use crate::audit::{AuditLog, TurnRecord};
use crate::config::{Config, IntegrationStrategy};
use crate::llm::{LlmClient, OpenAiClient};
use crate::models::{AgentContexts, AgentId, Plan, TurnOutcome, TurnState, UserContexts};
use crate::planner::{LlmPlanner, Planner};
use crate::prompts::PromptLibrary;
use crate::runtime::{AgentRuntime, StepRequest};
use crate::tools::{create_default_registry, DataSources, MarketDataApi, ScenarioModel};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reply used whenever a turn ends without a usable answer
pub const FALLBACK_RESPONSE: &str =
    "죄송합니다. 현재 서비스에 일시적인 문제가 발생했습니다. 잠시 후 다시 시도해주세요.";

/// Consecutive `ToolLoopExceeded` steps that end the turn
const MAX_CONSECUTIVE_LOOP_EXHAUSTIONS: usize = 2;

/// Mutable state of one turn
struct Turn<'a> {
    id: Uuid,
    session_id: Option<Uuid>,
    message: &'a str,
    started: Instant,
    trace: Vec<TurnState>,
    plan: Option<Plan>,
    user: UserContexts,
    agents: AgentContexts,
}

impl Turn<'_> {
    fn enter(&mut self, state: TurnState) {
        debug!(turn_id = %self.id, state = %state, "Turn state");
        self.trace.push(state);
    }

    fn progress(&self) -> Option<String> {
        self.agents
            .last_output()
            .map(|output| output.progress_description.clone())
    }
}

pub struct Orchestrator {
    planner: Box<dyn Planner>,
    runtime: AgentRuntime,
    audit_log: Arc<AuditLog>,
}

impl Orchestrator {
    pub fn new(planner: Box<dyn Planner>, runtime: AgentRuntime, audit_log: Arc<AuditLog>) -> Self {
        Self {
            planner,
            runtime,
            audit_log,
        }
    }

    /// Wire the production components: OpenAI-compatible model, HTTP market
    /// data, prompt templates from disk and the model-backed manager.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let prompts = Arc::new(PromptLibrary::load(&config.prompts_dir)?);
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm)?);

        let market = MarketDataApi::new(config.market_data_base_url.as_deref(), config.runtime.tool_timeout)?;
        let sources = DataSources::from_api(market);

        let scenario_model = ScenarioModel {
            model: config.model_for(AgentId::Simulator).to_string(),
            temperature: config.temperature_for(AgentId::Simulator),
        };
        let registry = create_default_registry(&sources, llm.clone(), scenario_model);

        info!(
            tools = ?registry.list(),
            model = %config.llm.model,
            integration = ?config.integration,
            "Orchestrator components ready"
        );

        let planner = LlmPlanner::new(llm.clone(), prompts.clone(), config.clone());
        let runtime = AgentRuntime::new(llm, Arc::new(registry), prompts, config);

        Ok(Self::new(Box::new(planner), runtime, Arc::new(AuditLog::new())))
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.audit_log.clone()
    }

    /// Run one user turn outside of any session
    pub async fn run_turn(
        &self,
        message: &str,
        user: UserContexts,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.run_session_turn(None, message, user, cancel).await
    }

    /// Run one user turn.
    ///
    /// Always returns an outcome: failures end in `Aborted` with the
    /// fallback reply, and the user context carries the turn either way.
    pub async fn run_session_turn(
        &self,
        session_id: Option<Uuid>,
        message: &str,
        mut user: UserContexts,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        user.add_user_message(message);

        let mut turn = Turn {
            id: Uuid::new_v4(),
            session_id,
            message,
            started: Instant::now(),
            trace: Vec::new(),
            plan: None,
            user,
            agents: AgentContexts::default(),
        };

        info!(turn_id = %turn.id, session_id = ?session_id, "Turn started");

        // === PLAN ===
        turn.enter(TurnState::Planning);

        if cancel.is_cancelled() {
            return self.abort(turn, "cancelled".to_string()).await;
        }

        let plan = match self.planner.create_plan(message, &turn.user).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(turn_id = %turn.id, error = %e, "Planning failed");
                return self.abort(turn, e.to_string()).await;
            }
        };

        turn.agents = AgentContexts::for_plan(&plan);
        turn.plan = Some(plan.clone());

        // === EXECUTE (plan order) ===
        let mut loop_exhaustions = 0;

        for (i, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.abort(turn, "cancelled".to_string()).await;
            }

            turn.enter(TurnState::Executing { step: i + 1 });

            let report = self
                .runtime
                .run_step(StepRequest {
                    agent: step.agent,
                    description: &step.description,
                    user_message: message,
                    user: &turn.user,
                    agents: &turn.agents,
                })
                .await;

            let exhausted = report.loop_exceeded();
            if let Some(e) = &report.failure {
                debug!(turn_id = %turn.id, step = i + 1, error = %e, "Step degraded");
            }

            turn.agents.record_step(report.output);
            debug_assert!(turn.agents.is_consistent());

            if exhausted {
                loop_exhaustions += 1;
                if loop_exhaustions >= MAX_CONSECUTIVE_LOOP_EXHAUSTIONS {
                    let reason = format!(
                        "{} consecutive steps exhausted their tool-call budget",
                        loop_exhaustions
                    );
                    return self.abort(turn, reason).await;
                }
            } else {
                loop_exhaustions = 0;
            }
        }

        if cancel.is_cancelled() {
            return self.abort(turn, "cancelled".to_string()).await;
        }

        // === INTEGRATE ===
        turn.enter(TurnState::Integrating);
        let response = self.integrate(message, &turn.agents).await;

        turn.enter(TurnState::Done);
        self.finish(turn, response, None).await
    }

    /// Final reply from the step outputs
    async fn integrate(&self, message: &str, agents: &AgentContexts) -> String {
        let outputs = agents.previous_results();
        let last = agents
            .last_output()
            .map(|output| output.output.clone())
            .unwrap_or_else(|| FALLBACK_RESPONSE.to_string());

        match self.runtime.config().integration {
            IntegrationStrategy::LastOutput => last,
            IntegrationStrategy::Summarize if outputs.len() < 2 => last,
            IntegrationStrategy::Summarize => match self.runtime.summarize(message, outputs).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "Summarization failed, passing last output through");
                    last
                }
            },
        }
    }

    async fn abort(&self, mut turn: Turn<'_>, reason: String) -> TurnOutcome {
        warn!(
            turn_id = %turn.id,
            completed_steps = turn.agents.current_step,
            reason = %reason,
            "Turn aborted"
        );
        turn.enter(TurnState::Aborted);
        self.finish(turn, FALLBACK_RESPONSE.to_string(), Some(reason)).await
    }

    /// Close the turn in the user context and write the audit record
    async fn finish(&self, mut turn: Turn<'_>, response: String, abort_reason: Option<String>) -> TurnOutcome {
        let progress = turn.progress();
        turn.user
            .record_turn_result(response.clone(), progress, turn.agents.agent_output.clone());

        let state = turn.trace.last().copied().unwrap_or(TurnState::Aborted);
        let elapsed_ms = turn.started.elapsed().as_millis() as u64;

        let outcome = TurnOutcome {
            turn_id: turn.id,
            response,
            state,
            state_trace: turn.trace,
            abort_reason,
            plan: turn.plan,
            user_contexts: turn.user,
            agent_contexts: turn.agents,
            elapsed_ms,
        };

        let record = TurnRecord::from_outcome(turn.session_id, turn.message, &outcome);
        if let Err(e) = self.audit_log.record(record).await {
            warn!(turn_id = %outcome.turn_id, error = %e, "Failed to write audit record");
        }

        info!(
            turn_id = %outcome.turn_id,
            state = %outcome.state,
            steps = outcome.agent_contexts.current_step,
            elapsed_ms,
            "Turn finished"
        );

        outcome
    }
}
