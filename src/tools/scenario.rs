//! Generative tool: market scenarios for a portfolio

use crate::error::ToolError;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::tools::{names, ScenarioModel, Tool, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_SCENARIO_COUNT: usize = 3;
const MAX_SCENARIO_COUNT: usize = 5;

const SYSTEM_PROMPT: &str =
    "당신은 금융 시장 분석 전문가입니다. 현실적이고 구체적인 시장 시나리오를 JSON으로만 작성합니다.";

/// Codes annotated with a display name in prompts and fallback payloads
const KNOWN_STOCKS: [(&str, &str); 7] = [
    ("005930", "삼성전자"),
    ("000660", "SK하이닉스"),
    ("373220", "LG에너지솔루션"),
    ("207940", "삼성바이오로직스"),
    ("005935", "삼성전자우"),
    ("035420", "NAVER"),
    ("003670", "포스코DX"),
];

pub fn stock_name(code: &str) -> Option<&'static str> {
    KNOWN_STOCKS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, name)| *name)
}

/// Portfolio as a JSON array, a JSON-array string, or a comma list
fn parse_portfolio(args: &Value) -> Result<Vec<String>, ToolError> {
    let stocks: Vec<String> = match args.get("portfolio_stocks") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(raw)) => {
            let raw = raw.trim();
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(list) if raw.starts_with('[') => list,
                _ => raw.split(',').map(str::to_string).collect(),
            }
        }
        _ => Vec::new(),
    };

    let stocks: Vec<String> = stocks
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if stocks.is_empty() {
        return Err(ToolError::InvalidArguments(
            "expected 'portfolio_stocks' as a list of stock codes".to_string(),
        ));
    }
    Ok(stocks)
}

fn scenario_count(args: &Value) -> usize {
    args.get("scenario_count")
        .and_then(|v| v.as_u64())
        .map(|n| (n as usize).clamp(1, MAX_SCENARIO_COUNT))
        .unwrap_or(DEFAULT_SCENARIO_COUNT)
}

fn describe_stock(code: &str) -> String {
    match stock_name(code) {
        Some(name) => format!("{}({})", code, name),
        None => code.to_string(),
    }
}

fn build_prompt(stocks: &[String], count: usize) -> String {
    let portfolio: Vec<String> = stocks.iter().map(|s| describe_stock(s)).collect();

    format!(
        "다음 포트폴리오에 대해 현실적인 시장 시나리오 {count}개를 만들어주세요.\n\n\
         포트폴리오 종목: {portfolio}\n\n\
         - 실제로 일어날 수 있는 상황만 다룹니다.\n\
         - 종목별 영향을 수치로 제시합니다.\n\
         - 긍정, 부정, 중립 시나리오를 고르게 포함합니다.\n\n\
         다음 형식의 JSON 객체로 답하세요:\n\
         {{\"scenarios\": [{{\"scenario_name\": \"...\", \"description\": \"...\", \
         \"probability\": 0, \"impact_summary\": \"...\", \
         \"stock_impacts\": [{{\"stock_code\": \"...\", \"stock_name\": \"...\", \"expected_change\": 0.0}}]}}]}}",
        count = count,
        portfolio = portfolio.join(", "),
    )
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Accepts an array, `{"scenarios": [...]}`, or a single scenario object
pub fn parse_scenarios(raw: &str) -> Result<Vec<Value>, ToolError> {
    let value: Value = serde_json::from_str(strip_fences(raw))
        .map_err(|e| ToolError::Generation(format!("scenario output is not JSON: {}", e)))?;

    let scenarios = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("scenarios") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ToolError::Generation("'scenarios' is not an array".to_string()));
            }
            None => vec![Value::Object(obj)],
        },
        _ => return Err(ToolError::Generation("unexpected scenario output".to_string())),
    };

    if scenarios.is_empty() || scenarios.iter().any(|s| s.get("scenario_name").is_none()) {
        return Err(ToolError::Generation(
            "scenario output is missing scenario_name".to_string(),
        ));
    }

    Ok(scenarios)
}

/// Fixed scenarios used when generation keeps failing
pub fn fallback_scenarios(stocks: &[String], count: usize) -> Vec<Value> {
    let impacts = |change: f64| -> Vec<Value> {
        stocks
            .iter()
            .map(|code| {
                json!({
                    "stock_code": code,
                    "stock_name": stock_name(code).unwrap_or(code.as_str()),
                    "expected_change": change,
                })
            })
            .collect()
    };

    vec![
        json!({
            "scenario_name": "금리 인상 시나리오",
            "description": "중앙은행의 기준금리 0.5%p 인상으로 인한 시장 조정",
            "probability": 40,
            "impact_summary": "기술주 약세, 금융주 강세 예상",
            "stock_impacts": impacts(-3.5),
        }),
        json!({
            "scenario_name": "반도체 수요 회복",
            "description": "AI 수요와 스마트폰 교체 주기로 메모리 반도체 가격 상승",
            "probability": 60,
            "impact_summary": "반도체 관련주 전반적 상승 기대",
            "stock_impacts": impacts(5.2),
        }),
    ]
    .into_iter()
    .take(count)
    .collect()
}

pub struct ScenarioTool {
    llm: Arc<dyn LlmClient>,
    model: ScenarioModel,
}

impl ScenarioTool {
    pub fn new(llm: Arc<dyn LlmClient>, model: ScenarioModel) -> Self {
        Self { llm, model }
    }
}

#[async_trait::async_trait]
impl Tool for ScenarioTool {
    fn name(&self) -> &'static str {
        names::GENERATE_SCENARIOS
    }

    fn description(&self) -> &'static str {
        "Generate market scenarios with probabilities and per-stock expected changes for a portfolio"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "portfolio_stocks": {
                    "type": "string",
                    "description": "Comma separated stock codes or a JSON array, e.g. 005930,000660"
                },
                "scenario_count": {
                    "type": "integer",
                    "description": "Number of scenarios (default 3)"
                }
            },
            "required": ["portfolio_stocks"]
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let stocks = parse_portfolio(args)?;
        let count = scenario_count(args);

        let request = CompletionRequest::new(
            self.model.model.clone(),
            self.model.temperature,
            vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(&stocks, count)),
            ],
        )
        .json();

        let completion = self
            .llm
            .complete(&request)
            .await
            .map_err(|e| ToolError::Generation(format!("scenario model call failed: {}", e)))?;

        let raw = completion
            .text()
            .ok_or_else(|| ToolError::Generation("scenario model returned no text".to_string()))?;

        let mut scenarios = parse_scenarios(raw)?;
        scenarios.truncate(count);
        debug!(count = scenarios.len(), "Generated scenarios");

        Ok(Value::Array(scenarios))
    }

    fn degraded(&self, args: &Value) -> Option<Value> {
        let stocks = parse_portfolio(args).ok()?;
        warn!(stocks = stocks.len(), "Using fallback scenario template");
        Some(Value::Array(fallback_scenarios(&stocks, scenario_count(args))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::test_support::ScriptedLlm;

    fn tool(llm: ScriptedLlm) -> ScenarioTool {
        ScenarioTool::new(
            Arc::new(llm),
            ScenarioModel {
                model: "gpt-4.1-mini".to_string(),
                temperature: 0.7,
            },
        )
    }

    #[test]
    fn test_portfolio_formats() {
        let list = parse_portfolio(&json!({"portfolio_stocks": "005930, 000660"})).unwrap();
        assert_eq!(list, vec!["005930", "000660"]);

        let list = parse_portfolio(&json!({"portfolio_stocks": "[\"005930\",\"035420\"]"})).unwrap();
        assert_eq!(list, vec!["005930", "035420"]);

        let list = parse_portfolio(&json!({"portfolio_stocks": ["373220"]})).unwrap();
        assert_eq!(list, vec!["373220"]);

        assert!(parse_portfolio(&json!({"portfolio_stocks": " , "})).is_err());
    }

    #[test]
    fn test_prompt_annotates_known_codes() {
        let prompt = build_prompt(&["005930".to_string(), "999999".to_string()], 2);
        assert!(prompt.contains("005930(삼성전자)"));
        assert!(prompt.contains("999999"));
        assert!(prompt.contains("2개"));
    }

    #[test]
    fn test_parse_shapes() {
        let wrapped = r#"{"scenarios": [{"scenario_name": "a"}, {"scenario_name": "b"}]}"#;
        assert_eq!(parse_scenarios(wrapped).unwrap().len(), 2);

        let array = r#"```json
[{"scenario_name": "a"}]
```"#;
        assert_eq!(parse_scenarios(array).unwrap().len(), 1);

        let single = r#"{"scenario_name": "a", "probability": 30}"#;
        assert_eq!(parse_scenarios(single).unwrap()[0]["probability"], 30);

        assert!(matches!(parse_scenarios("not json"), Err(ToolError::Generation(_))));
        assert!(matches!(parse_scenarios("{\"foo\": 1}"), Err(ToolError::Generation(_))));
    }

    #[test]
    fn test_fallback_template() {
        let stocks = vec!["005930".to_string(), "123456".to_string()];
        let scenarios = fallback_scenarios(&stocks, 3);
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0]["scenario_name"], "금리 인상 시나리오");
        assert_eq!(scenarios[0]["stock_impacts"][0]["stock_name"], "삼성전자");
        assert_eq!(scenarios[0]["stock_impacts"][1]["stock_name"], "123456");
        assert_eq!(scenarios[1]["stock_impacts"][0]["expected_change"], 5.2);

        assert_eq!(fallback_scenarios(&stocks, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_generation_truncates_to_count() {
        let llm = ScriptedLlm::new(vec![Completion::Message(
            r#"{"scenarios": [{"scenario_name": "a"}, {"scenario_name": "b"}, {"scenario_name": "c"}]}"#
                .to_string(),
        )]);
        let result = tool(llm)
            .execute(&json!({"portfolio_stocks": "005930", "scenario_count": 2}))
            .await
            .unwrap();
        assert_eq!(result.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_output_is_generation_error() {
        let llm = ScriptedLlm::new(vec![Completion::Message("시나리오를 만들 수 없습니다".to_string())]);
        let scenario_tool = tool(llm);

        let err = scenario_tool
            .execute(&json!({"portfolio_stocks": "005930"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(scenario_tool.degraded(&json!({"portfolio_stocks": "005930"})).is_some());
    }
}
