//! Listing search and company fundamentals

use crate::error::ToolError;
use crate::tools::data::{CompanyDirectory, Listing, MarketData};
use crate::tools::{names, optional_str, required_str, stock_code_arg, stock_code_schema, Tool, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;

/// Alternatives listed next to the chosen partial match
const MAX_ALTERNATIVES: usize = 4;

#[derive(Debug, PartialEq)]
enum MatchKind {
    Exact,
    Partial,
    Ambiguous,
}

impl MatchKind {
    fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Partial => "partial",
            MatchKind::Ambiguous => "ambiguous",
        }
    }
}

/// Exact name match first, then substring matches. `market_hint` narrows
/// substring candidates when it leaves at least one.
fn find_listing<'a>(
    listings: &'a [Listing],
    query: &str,
    market_hint: Option<&str>,
) -> Option<(MatchKind, &'a Listing, Vec<&'a str>)> {
    if let Some(listing) = listings.iter().find(|l| l.name == query) {
        return Some((MatchKind::Exact, listing, Vec::new()));
    }

    let mut candidates: Vec<&Listing> = listings.iter().filter(|l| l.name.contains(query)).collect();

    if let Some(hint) = market_hint {
        let narrowed: Vec<&Listing> = candidates
            .iter()
            .copied()
            .filter(|l| l.market.eq_ignore_ascii_case(hint))
            .collect();
        if !narrowed.is_empty() {
            candidates = narrowed;
        }
    }

    match candidates.as_slice() {
        [] => None,
        [only] => Some((MatchKind::Partial, *only, Vec::new())),
        [first, rest @ ..] => Some((
            MatchKind::Ambiguous,
            *first,
            rest.iter().take(MAX_ALTERNATIVES).map(|l| l.name.as_str()).collect(),
        )),
    }
}

pub struct StockCodeSearchTool {
    market: Arc<dyn MarketData>,
}

impl StockCodeSearchTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl Tool for StockCodeSearchTool {
    fn name(&self) -> &'static str {
        names::SEARCH_STOCK_CODE
    }

    fn description(&self) -> &'static str {
        "Find the KRX stock code for a company name (exact match first, then partial)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "company_name": {
                    "type": "string",
                    "description": "Company name, e.g. 삼성전자"
                },
                "additional_info": {
                    "type": "string",
                    "description": "Optional market hint such as KOSPI or KOSDAQ"
                }
            },
            "required": ["company_name"]
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let company_name = required_str(args, "company_name")?;
        let market_hint = optional_str(args, "additional_info");

        let listings = self.market.listings().await?;

        let (kind, listing, alternatives) = find_listing(&listings, company_name, market_hint)
            .ok_or_else(|| ToolError::NotFound(format!("no listed company matches '{}'", company_name)))?;

        Ok(json!({
            "code": listing.code,
            "name": listing.name,
            "market": listing.market,
            "match": kind.as_str(),
            "alternatives": alternatives,
        }))
    }
}

pub struct CompanyInfoTool {
    companies: Arc<dyn CompanyDirectory>,
}

impl CompanyInfoTool {
    pub fn new(companies: Arc<dyn CompanyDirectory>) -> Self {
        Self { companies }
    }
}

#[async_trait::async_trait]
impl Tool for CompanyInfoTool {
    fn name(&self) -> &'static str {
        names::GET_COMPANY_INFO
    }

    fn description(&self) -> &'static str {
        "Company name, financial summary and industry comparison for a stock code"
    }

    fn parameters(&self) -> Value {
        stock_code_schema()
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let code = stock_code_arg(args)?;
        let profile = self.companies.company_profile(code).await?;

        Ok(json!({
            "stock_code": profile.code,
            "company_name": profile.name,
            "financial_summary": profile.financial_summary,
            "industry_comparison": profile.industry_comparison,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubMarketData;

    fn krx() -> StubMarketData {
        StubMarketData::default()
            .with_listing("005930", "삼성전자", "KOSPI")
            .with_listing("005935", "삼성전자우", "KOSPI")
            .with_listing("207940", "삼성바이오로직스", "KOSPI")
            .with_listing("028050", "삼성E&A", "KOSPI")
            .with_listing("000660", "SK하이닉스", "KOSPI")
            .with_listing("068760", "셀트리온제약", "KOSDAQ")
            .with_listing("068270", "셀트리온", "KOSPI")
    }

    #[tokio::test]
    async fn test_exact_match_wins() {
        let tool = StockCodeSearchTool::new(Arc::new(krx()));
        let result = tool.execute(&json!({"company_name": "삼성전자"})).await.unwrap();
        assert_eq!(result["code"], "005930");
        assert_eq!(result["match"], "exact");
    }

    #[tokio::test]
    async fn test_partial_match_lists_alternatives() {
        let tool = StockCodeSearchTool::new(Arc::new(krx()));

        let result = tool.execute(&json!({"company_name": "하이닉스"})).await.unwrap();
        assert_eq!(result["code"], "000660");
        assert_eq!(result["match"], "partial");

        let result = tool.execute(&json!({"company_name": "삼성"})).await.unwrap();
        assert_eq!(result["code"], "005930");
        assert_eq!(result["match"], "ambiguous");
        assert_eq!(result["alternatives"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_market_hint_narrows_candidates() {
        let tool = StockCodeSearchTool::new(Arc::new(krx()));
        let result = tool
            .execute(&json!({"company_name": "트리온", "additional_info": "kosdaq"}))
            .await
            .unwrap();
        assert_eq!(result["code"], "068760");
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let tool = StockCodeSearchTool::new(Arc::new(krx()));
        let err = tool.execute(&json!({"company_name": "없는회사"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_company_info() {
        let market = StubMarketData::default().with_company("005930", "삼성전자");
        let tool = CompanyInfoTool::new(Arc::new(market));

        let result = tool.execute(&json!({"stock_code": "005930"})).await.unwrap();
        assert_eq!(result["company_name"], "삼성전자");

        let err = tool.execute(&json!({"stock_code": "999999"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
