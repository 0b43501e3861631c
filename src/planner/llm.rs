//! Manager agent backed by the chat model

use crate::config::Config;
use crate::error::OrchestrationError;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::models::{AgentContexts, AgentId, Plan, UserContexts};
use crate::planner::{parse_plan_response, Planner};
use crate::prompts::{build_context_prompt, PromptLibrary};
use crate::runtime::retry;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_retry::RetryIf;
use tracing::{info, warn};

pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    config: Arc<Config>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>, config: Arc<Config>) -> Self {
        Self {
            llm,
            prompts,
            config,
        }
    }

    /// Planning request appended after the manager's context prompt
    fn build_request(&self, message: &str) -> String {
        format!(
            r#"사용자 요청: "{message}"

위 요청을 분석해 작업 계획(PLAN)을 세워주세요.
계획은 최대 {max_steps}단계입니다. agent_name은 conversational, trend, stock-analyst, simulator, fund-manager 중 하나입니다.

JSON 형식으로만 응답하세요:
{{
  "total_steps": 1,
  "plans": [
    {{
      "agent_name": "trend",
      "description": "구체적인 작업 설명",
      "tool_recommendation": ["get_market_indicators"]
    }}
  ],
  "mode": "chat"
}}"#,
            message = message,
            max_steps = self.config.max_plan_steps,
        )
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn create_plan(&self, message: &str, user: &UserContexts) -> Result<Plan> {
        let agent = AgentId::Manager;
        let system = build_context_prompt(self.prompts.template(agent), user, &AgentContexts::default());

        let request = CompletionRequest::new(
            self.config.model_for(agent),
            self.config.temperature_for(agent),
            vec![ChatMessage::system(system), ChatMessage::user(self.build_request(message))],
        )
        .json();

        let timeout = self.config.llm.timeout;
        let completion = RetryIf::spawn(
            retry::backoff(self.config.runtime.retry_backoff, self.config.runtime.retry_budget),
            || {
                let request = &request;
                async move {
                    tokio::time::timeout(timeout, self.llm.complete(request))
                        .await
                        .unwrap_or_else(|_| {
                            Err(OrchestrationError::LlmError("planning call timed out".to_string()))
                        })
                }
            },
            |e: &OrchestrationError| {
                let retry = e.is_retryable();
                if retry {
                    warn!(error = %e, "Planning call failed, retrying");
                }
                retry
            },
        )
        .await
        .map_err(|e| OrchestrationError::PlanGeneration(format!("manager model unavailable: {}", e)))?;

        let raw = completion.text().ok_or_else(|| {
            OrchestrationError::PlanGeneration("manager returned no text".to_string())
        })?;

        let plan = parse_plan_response(raw, self.config.max_plan_steps)?;

        info!(
            steps = plan.len(),
            agents = ?plan.steps.iter().map(|s| s.agent.as_str()).collect::<Vec<_>>(),
            "Plan created"
        );

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan_reply, prompt_library, test_config, text, ScriptStep, ScriptedLlm};

    fn planner(llm: Arc<ScriptedLlm>) -> LlmPlanner {
        LlmPlanner::new(llm, Arc::new(prompt_library()), Arc::new(test_config()))
    }

    #[tokio::test]
    async fn test_plan_from_manager_reply() {
        let llm = Arc::new(ScriptedLlm::new(vec![plan_reply(&[("trend", "KOSPI 현황 확인")])]));
        let plan = planner(llm.clone())
            .create_plan("KOSPI 오늘 어때?", &UserContexts::default())
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].agent, AgentId::Trend);

        let requests = llm.requests().await;
        assert!(requests[0].json_response);
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].messages[1].content.as_deref().unwrap().contains("KOSPI 오늘 어때?"));
    }

    #[tokio::test]
    async fn test_unavailable_model_is_plan_generation() {
        let llm = Arc::new(ScriptedLlm::from_steps(vec![
            ScriptStep::Fail("down".to_string()),
            ScriptStep::Fail("down".to_string()),
        ]));
        let err = planner(llm)
            .create_plan("hi", &UserContexts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::PlanGeneration(_)));
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_retried() {
        let llm = Arc::new(ScriptedLlm::from_steps(vec![
            ScriptStep::Reject("provider returned 400 Bad Request".to_string()),
            ScriptStep::Reply(plan_reply(&[("trend", "KOSPI 현황 확인")])),
        ]));
        let err = planner(llm.clone())
            .create_plan("hi", &UserContexts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::PlanGeneration(ref msg) if msg.contains("400")));
        assert_eq!(llm.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_prose_reply_is_plan_generation() {
        let llm = Arc::new(ScriptedLlm::new(vec![text("비비에게 맡기겠습니다.")]));
        let err = planner(llm)
            .create_plan("hi", &UserContexts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::PlanGeneration(_)));
        assert!(err.is_turn_fatal());
    }
}
