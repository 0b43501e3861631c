//! Prompt templates and the per-step context block

use crate::error::OrchestrationError;
use crate::models::{AgentContexts, AgentId, ChatRole, UserContexts};
use crate::Result;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::Path;
use tracing::info;

const RECENT_TURNS: usize = 5;
const CHAT_PREVIEW_CHARS: usize = 100;
const OUTPUT_PREVIEW_CHARS: usize = 200;

/// One system prompt template per agent, loaded once at startup
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<AgentId, String>,
}

impl PromptLibrary {
    /// Read `<dir>/<agent-id>.md` for every agent. A missing file is fatal.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut templates = HashMap::new();

        for agent in AgentId::ALL {
            let path = dir.join(format!("{}.md", agent.as_str()));
            let template = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => OrchestrationError::Config(format!(
                    "missing prompt template for '{}': {}",
                    agent,
                    path.display()
                )),
                _ => OrchestrationError::IoError(e),
            })?;
            templates.insert(agent, template);
        }

        info!(dir = %dir.display(), count = templates.len(), "Loaded prompt templates");
        Ok(Self { templates })
    }

    pub fn from_map(templates: HashMap<AgentId, String>) -> Result<Self> {
        if let Some(missing) = AgentId::ALL.into_iter().find(|a| !templates.contains_key(a)) {
            return Err(OrchestrationError::Config(format!(
                "missing prompt template for '{}'",
                missing
            )));
        }
        Ok(Self { templates })
    }

    /// Build every template from a function of the agent
    pub fn from_fn(template: impl Fn(AgentId) -> String) -> Self {
        Self {
            templates: AgentId::ALL.into_iter().map(|a| (a, template(a))).collect(),
        }
    }

    pub fn template(&self, agent: AgentId) -> &str {
        self.templates.get(&agent).map(String::as_str).unwrap_or_default()
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Template followed by the context block: profile, recent chat, previous
/// step results and step progress.
pub fn build_context_prompt(template: &str, user: &UserContexts, agents: &AgentContexts) -> String {
    let mut prompt = String::with_capacity(template.len() + 1024);
    prompt.push_str(template.trim_end());
    prompt.push_str("\n\n=== 컨텍스트 정보 ===\n");

    if !user.user_info.is_empty() {
        prompt.push_str("\n【사용자 정보】\n");
        for (key, value) in &user.user_info {
            let _ = writeln!(prompt, "- {}: {}", key, value);
        }
    }

    let recent = user.recent_turns(RECENT_TURNS);
    if !recent.is_empty() {
        prompt.push_str("\n【최근 대화 기록】\n");
        for turn in recent {
            let speaker = match turn.role {
                ChatRole::User => "사용자",
                ChatRole::Assistant => "AI",
            };
            let _ = writeln!(prompt, "- {}: {}", speaker, preview(&turn.content, CHAT_PREVIEW_CHARS));
        }
    }

    if !agents.agent_output.is_empty() {
        prompt.push_str("\n【이전 에이전트 작업 결과】\n");
        for output in &agents.agent_output {
            let _ = writeln!(prompt, "- {}: {}", output.agent, output.progress_description);
            let _ = writeln!(prompt, "  결과: {}", preview(&output.output, OUTPUT_PREVIEW_CHARS));
        }
    }

    let completed: Vec<&str> = agents.agent_id_history.iter().map(|a| a.as_str()).collect();
    prompt.push_str("\n【작업 진행 상황】\n");
    let _ = writeln!(prompt, "- 현재 단계: {}/{}", agents.current_step + 1, agents.total_step);
    let _ = writeln!(
        prompt,
        "- 완료된 에이전트: {}",
        if completed.is_empty() { "없음".to_string() } else { completed.join(", ") }
    );

    prompt.push_str("\n위 정보를 참고하여 사용자의 요청에 적절히 응답해주세요.");
    prompt
}
