//! Planner trait and implementations
//!
//! The manager agent turns a user message into an ordered list of
//! (agent, sub-task) steps. It never executes a step itself.

use crate::error::OrchestrationError;
use crate::models::{AgentId, Plan, PlanMode, PlanStep, UserContexts};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

pub mod llm;
pub use llm::LlmPlanner;

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, message: &str, user: &UserContexts) -> Result<Plan>;
}

/// What a [`StaticPlanner`] answers with
#[derive(Debug, Clone)]
enum StaticReply {
    Plan(Plan),
    Unparseable(String),
    OffRoster(String),
}

/// Planner with a fixed answer, for tests and offline runs
pub struct StaticPlanner {
    reply: StaticReply,
}

impl StaticPlanner {
    pub fn new(plan: Plan) -> Self {
        Self {
            reply: StaticReply::Plan(plan),
        }
    }

    /// Single step for one agent
    pub fn single(agent: AgentId, description: &str) -> Self {
        Self::new(Plan::new(vec![PlanStep::new(agent, description)]))
    }

    /// Always fails with `PlanGeneration`
    pub fn failing(reason: &str) -> Self {
        Self {
            reply: StaticReply::Unparseable(reason.to_string()),
        }
    }

    /// Always fails with `InvalidPlan`
    pub fn invalid(reason: &str) -> Self {
        Self {
            reply: StaticReply::OffRoster(reason.to_string()),
        }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn create_plan(&self, _message: &str, _user: &UserContexts) -> Result<Plan> {
        match &self.reply {
            StaticReply::Plan(plan) => validate_plan(plan.clone(), usize::MAX),
            StaticReply::Unparseable(reason) => Err(OrchestrationError::PlanGeneration(reason.clone())),
            StaticReply::OffRoster(reason) => Err(OrchestrationError::InvalidPlan(reason.clone())),
        }
    }
}

/// Roster and size checks shared by every planner
pub fn validate_plan(plan: Plan, max_steps: usize) -> Result<Plan> {
    if plan.is_empty() {
        return Err(OrchestrationError::PlanGeneration("plan has no steps".to_string()));
    }
    if plan.len() > max_steps {
        return Err(OrchestrationError::InvalidPlan(format!(
            "plan has {} steps, at most {} allowed",
            plan.len(),
            max_steps
        )));
    }
    if let Some(step) = plan.steps.iter().find(|s| s.agent == AgentId::Manager) {
        return Err(OrchestrationError::InvalidPlan(format!(
            "the manager cannot execute a step ('{}')",
            step.description
        )));
    }
    Ok(plan)
}

fn strip_code_fence(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse the manager's JSON plan:
/// `{"total_steps", "plans": [{"agent_name", "description", "tool_recommendation"}], "mode"}`
pub fn parse_plan_response(response: &str, max_steps: usize) -> Result<Plan> {
    let cleaned = strip_code_fence(response);

    let json: Value = serde_json::from_str(cleaned).map_err(|e| {
        OrchestrationError::PlanGeneration(format!("manager output is not valid JSON: {}", e))
    })?;

    let entries = json
        .get("plans")
        .and_then(|v| v.as_array())
        .ok_or_else(|| OrchestrationError::PlanGeneration("'plans' array is missing".to_string()))?;

    let mut steps = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let agent_name = entry
            .get("agent_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OrchestrationError::PlanGeneration(format!("plan entry {} has no agent_name", i + 1))
            })?;

        let agent = agent_name.parse::<AgentId>()?;

        let description = entry
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                OrchestrationError::PlanGeneration(format!("plan entry {} has no description", i + 1))
            })?;

        let tool_recommendation = entry
            .get("tool_recommendation")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        steps.push(PlanStep {
            agent,
            description: description.to_string(),
            tool_recommendation,
        });
    }

    let mode = match json.get("mode").and_then(|v| v.as_str()) {
        Some(m) if m.eq_ignore_ascii_case("agent") => PlanMode::Agent,
        _ => PlanMode::Chat,
    };

    if let Some(declared) = json.get("total_steps").and_then(|v| v.as_u64()) {
        if declared as usize != steps.len() {
            debug!(declared, actual = steps.len(), "total_steps disagrees with plans");
        }
    }

    validate_plan(Plan { steps, mode }, max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manager_plan() {
        let raw = r#"```json
{
  "total_steps": 2,
  "plans": [
    {"agent_name": "trend", "description": "시장 동향 파악", "tool_recommendation": ["get_market_indicators"]},
    {"agent_name": "아거", "description": "삼성전자 분석", "tool_recommendation": []}
  ],
  "mode": "agent"
}
```"#;
        let plan = parse_plan_response(raw, 3).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].agent, AgentId::Trend);
        assert_eq!(plan.steps[0].tool_recommendation, vec!["get_market_indicators"]);
        assert_eq!(plan.steps[1].agent, AgentId::StockAnalyst);
        assert_eq!(plan.mode, PlanMode::Agent);
    }

    #[test]
    fn test_agent_name_variants() {
        let raw = r#"{"plans": [{"agent_name": "stock_analyst", "description": "분석"}]}"#;
        let plan = parse_plan_response(raw, 3).unwrap();
        assert_eq!(plan.steps[0].agent, AgentId::StockAnalyst);
        assert_eq!(plan.mode, PlanMode::Chat);
    }

    #[test]
    fn test_empty_and_malformed_are_generation_errors() {
        let empty = r#"{"total_steps": 0, "plans": [], "mode": "chat"}"#;
        assert!(matches!(
            parse_plan_response(empty, 3),
            Err(OrchestrationError::PlanGeneration(_))
        ));
        assert!(matches!(
            parse_plan_response("계획을 세울 수 없습니다", 3),
            Err(OrchestrationError::PlanGeneration(_))
        ));
        assert!(matches!(
            parse_plan_response(r#"{"steps": []}"#, 3),
            Err(OrchestrationError::PlanGeneration(_))
        ));
    }

    #[test]
    fn test_off_roster_agent_is_invalid() {
        let raw = r#"{"plans": [{"agent_name": "crypto-oracle", "description": "코인 예측"}]}"#;
        assert!(matches!(
            parse_plan_response(raw, 3),
            Err(OrchestrationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_manager_step_is_invalid() {
        let raw = r#"{"plans": [{"agent_name": "manager", "description": "직접 답변"}]}"#;
        assert!(matches!(
            parse_plan_response(raw, 3),
            Err(OrchestrationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_step_limit() {
        let raw = r#"{"plans": [
            {"agent_name": "trend", "description": "a"},
            {"agent_name": "stock-analyst", "description": "b"},
            {"agent_name": "simulator", "description": "c"},
            {"agent_name": "fund-manager", "description": "d"}
        ]}"#;
        assert!(matches!(
            parse_plan_response(raw, 3),
            Err(OrchestrationError::InvalidPlan(_))
        ));
        assert_eq!(parse_plan_response(raw, 4).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_static_planner() {
        let user = UserContexts::default();

        let plan = StaticPlanner::single(AgentId::Trend, "KOSPI 확인")
            .create_plan("KOSPI 오늘 어때?", &user)
            .await
            .unwrap();
        assert_eq!(plan.steps[0].agent, AgentId::Trend);

        let err = StaticPlanner::new(Plan::new(vec![]))
            .create_plan("hi", &user)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::PlanGeneration(_)));

        let err = StaticPlanner::invalid("off roster")
            .create_plan("hi", &user)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidPlan(_)));
    }
}
