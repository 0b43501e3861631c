//! Core data models for the multi-agent advisor

use crate::error::OrchestrationError;
use crate::tools::names;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Agents =================
//

/// The fixed agent roster. Dispatch goes through this enum, never through
/// free-form names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum AgentId {
    Manager,
    Conversational,
    Trend,
    StockAnalyst,
    Simulator,
    FundManager,
}

impl AgentId {
    pub const ALL: [AgentId; 6] = [
        AgentId::Manager,
        AgentId::Conversational,
        AgentId::Trend,
        AgentId::StockAnalyst,
        AgentId::Simulator,
        AgentId::FundManager,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentId::Manager => "manager",
            AgentId::Conversational => "conversational",
            AgentId::Trend => "trend",
            AgentId::StockAnalyst => "stock-analyst",
            AgentId::Simulator => "simulator",
            AgentId::FundManager => "fund-manager",
        }
    }

    /// Persona name used in user-facing progress captions
    pub fn persona(self) -> &'static str {
        match self {
            AgentId::Manager => "매니저",
            AgentId::Conversational => "비비",
            AgentId::Trend => "키키",
            AgentId::StockAnalyst => "아거",
            AgentId::Simulator => "라무",
            AgentId::FundManager => "콜리",
        }
    }

    /// Suffix for per-agent environment overrides (`AGENT_<ID>_MODEL`)
    pub fn env_key(self) -> &'static str {
        match self {
            AgentId::Manager => "MANAGER",
            AgentId::Conversational => "CONVERSATIONAL",
            AgentId::Trend => "TREND",
            AgentId::StockAnalyst => "STOCK_ANALYST",
            AgentId::Simulator => "SIMULATOR",
            AgentId::FundManager => "FUND_MANAGER",
        }
    }

    /// Tools this agent may call during its step
    pub fn bound_tools(self) -> &'static [&'static str] {
        match self {
            AgentId::Trend => &[
                names::GET_LATEST_NEWS,
                names::GET_MAJOR_MOVERS,
                names::GET_MARKET_INDICATORS,
            ],
            AgentId::StockAnalyst => &[
                names::SEARCH_STOCK_CODE,
                names::GET_STOCK_PRICE,
                names::ANALYZE_STOCK_PATTERN,
                names::GET_COMPANY_INFO,
            ],
            AgentId::Simulator => &[names::GENERATE_SCENARIOS],
            AgentId::Manager | AgentId::Conversational | AgentId::FundManager => &[],
        }
    }

    pub fn can_use_tool(self, tool: &str) -> bool {
        self.bound_tools().contains(&tool)
    }

    /// Resolve a roster member from a canonical id, a snake/space variant,
    /// or a persona name.
    pub fn parse(name: &str) -> Option<AgentId> {
        let normalized = name.trim().to_lowercase().replace(['_', ' '], "-");

        AgentId::ALL.into_iter().find(|agent| {
            agent.as_str() == normalized || agent.persona() == name.trim()
        })
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentId::parse(s).ok_or_else(|| {
            OrchestrationError::InvalidPlan(format!("'{}' is not a known agent", s))
        })
    }
}

//
// ================= User Context =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry of the session transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub progress: Option<String>,
    /// Step outputs of the turn this reply closed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_outputs: Vec<AgentOutput>,
}

/// Profile and transcript of one user, owned by the session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserContexts {
    #[serde(default)]
    pub user_info: BTreeMap<String, String>,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

impl UserContexts {
    pub fn with_profile(user_info: BTreeMap<String, String>) -> Self {
        Self {
            user_info,
            chat_history: Vec::new(),
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.chat_history.push(ChatTurn {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            progress: None,
            agent_outputs: Vec::new(),
        });
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>, progress: Option<String>) {
        self.record_turn_result(content, progress, Vec::new());
    }

    /// Close a turn: the reply plus every step output produced for it
    pub fn record_turn_result(
        &mut self,
        content: impl Into<String>,
        progress: Option<String>,
        agent_outputs: Vec<AgentOutput>,
    ) {
        self.chat_history.push(ChatTurn {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            progress,
            agent_outputs,
        });
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.chat_history
            .iter()
            .rev()
            .find(|turn| turn.role == ChatRole::User)
            .map(|turn| turn.content.as_str())
    }

    /// The `count` most recent turns, oldest first
    pub fn recent_turns(&self, count: usize) -> &[ChatTurn] {
        let start = self.chat_history.len().saturating_sub(count);
        &self.chat_history[start..]
    }

    pub fn clear(&mut self) {
        self.user_info.clear();
        self.chat_history.clear();
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

//
// ================= Agent Output =================
//

/// How a single tool call ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Success { payload: serde_json::Value },
    Failed { kind: String, error: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub attempts: u32,
    pub outcome: ToolCallOutcome,
    /// A fallback payload replaced the real result
    #[serde(default)]
    pub degraded: bool,
    pub elapsed_ms: u64,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ToolCallOutcome::Success { .. })
    }
}

/// Result of one executed plan step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutput {
    pub agent: AgentId,
    pub step_index: usize,
    pub progress_description: String,
    pub output: String,
    /// Output meant for the user rather than for a following agent
    pub final_output: bool,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub degraded_reason: Option<String>,
    #[serde(default)]
    pub trace: Vec<ToolCallRecord>,
}

//
// ================= Agent Context =================
//

/// Per-turn execution state.
///
/// `record_step` is the only way `current_step` moves, which keeps
/// `agent_output`, `agent_id_history` and `current_step` the same length.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentContexts {
    pub agent_id_history: Vec<AgentId>,
    pub total_step: usize,
    pub current_step: usize,
    pub agent_output: Vec<AgentOutput>,
}

impl AgentContexts {
    pub fn for_plan(plan: &Plan) -> Self {
        Self {
            agent_id_history: Vec::with_capacity(plan.steps.len()),
            total_step: plan.steps.len(),
            current_step: 0,
            agent_output: Vec::with_capacity(plan.steps.len()),
        }
    }

    pub fn record_step(&mut self, output: AgentOutput) {
        debug_assert!(self.current_step < self.total_step);
        debug_assert_eq!(output.step_index, self.current_step);

        self.agent_id_history.push(output.agent);
        self.agent_output.push(output);
        self.current_step += 1;
    }

    pub fn is_final_step(&self) -> bool {
        self.current_step >= self.total_step
    }

    pub fn previous_results(&self) -> &[AgentOutput] {
        &self.agent_output
    }

    pub fn last_output(&self) -> Option<&AgentOutput> {
        self.agent_output.last()
    }

    pub fn is_consistent(&self) -> bool {
        self.agent_output.len() == self.current_step
            && self.agent_id_history.len() == self.current_step
            && self.current_step <= self.total_step
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    #[default]
    Chat,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    pub agent: AgentId,
    pub description: String,
    #[serde(default)]
    pub tool_recommendation: Vec<String>,
}

impl PlanStep {
    pub fn new(agent: AgentId, description: impl Into<String>) -> Self {
        Self {
            agent,
            description: description.into(),
            tool_recommendation: Vec::new(),
        }
    }
}

/// Ordered (agent, sub-task) list produced once per turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub mode: PlanMode,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            steps,
            mode: PlanMode::Chat,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

//
// ================= Turn =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    Planning,
    Executing { step: usize },
    Integrating,
    Done,
    Aborted,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Aborted)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Planning => write!(f, "PLANNING"),
            TurnState::Executing { step } => write!(f, "EXECUTING(step={})", step),
            TurnState::Integrating => write!(f, "INTEGRATING"),
            TurnState::Done => write!(f, "DONE"),
            TurnState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Everything a caller gets back from one user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub response: String,
    pub state: TurnState,
    pub state_trace: Vec<TurnState>,
    pub abort_reason: Option<String>,
    pub plan: Option<Plan>,
    pub user_contexts: UserContexts,
    pub agent_contexts: AgentContexts,
    pub elapsed_ms: u64,
}
