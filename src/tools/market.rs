//! Network-backed market tools: news, movers, indicators, price, pattern

use crate::error::ToolError;
use crate::tools::analysis::{self, CrossSignal};
use crate::tools::data::{DailyBar, MarketData, NewsFeed};
use crate::tools::{names, round2, stock_code_arg, stock_code_schema, Tool, ToolResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const NEWS_LIMIT: usize = 10;

/// KOSPI bellwethers tracked by the movers tool
pub const MAJOR_STOCKS: [&str; 5] = ["005930", "000660", "373220", "207940", "005935"];

/// (symbol, label) pairs of the market indicators
pub const INDICATORS: [(&str, &str); 3] = [("KS11", "KOSPI"), ("KQ11", "KOSDAQ"), ("USD/KRW", "USD/KRW")];

/// Calendar days fetched to cover the last two sessions across weekends
const RECENT_DAYS: u32 = 7;
const PATTERN_DAYS: u32 = 90;

/// Latest close against the previous one: (close, change, change_pct)
fn last_change(bars: &[DailyBar]) -> Option<(f64, f64, f64)> {
    let [.., previous, latest] = bars else {
        return None;
    };
    let change = latest.close - previous.close;
    let change_pct = if previous.close == 0.0 {
        0.0
    } else {
        change / previous.close * 100.0
    };
    Some((latest.close, change, change_pct))
}

// ===== News =====

pub struct LatestNewsTool {
    news: Arc<dyn NewsFeed>,
}

impl LatestNewsTool {
    pub fn new(news: Arc<dyn NewsFeed>) -> Self {
        Self { news }
    }
}

#[async_trait::async_trait]
impl Tool for LatestNewsTool {
    fn name(&self) -> &'static str {
        names::GET_LATEST_NEWS
    }

    fn description(&self) -> &'static str {
        "Fetch the latest Korean market news headlines with a short summary each"
    }

    async fn execute(&self, _args: &Value) -> ToolResult {
        let items = self.news.latest(NEWS_LIMIT).await?;

        let headlines: Vec<Value> = items
            .into_iter()
            .filter(|item| !item.title.trim().is_empty() && !item.info.trim().is_empty())
            .take(NEWS_LIMIT)
            .map(|item| json!({"title": item.title.trim(), "info": item.info.trim()}))
            .collect();

        debug!(count = headlines.len(), "Fetched news headlines");
        Ok(Value::Array(headlines))
    }
}

// ===== Movers =====

pub struct MajorMoversTool {
    market: Arc<dyn MarketData>,
}

impl MajorMoversTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl Tool for MajorMoversTool {
    fn name(&self) -> &'static str {
        names::GET_MAJOR_MOVERS
    }

    fn description(&self) -> &'static str {
        "Daily change and volume of the major KOSPI stocks (Samsung Electronics, SK hynix, ...)"
    }

    async fn execute(&self, _args: &Value) -> ToolResult {
        // Names are cosmetic; a failing listing lookup falls back to the code.
        let listing_names: HashMap<String, String> = match self.market.listings().await {
            Ok(listings) => listings.into_iter().map(|l| (l.code, l.name)).collect(),
            Err(e) => {
                warn!("Listing lookup failed, movers will use codes as names: {}", e);
                HashMap::new()
            }
        };

        let mut movers = Vec::new();
        let mut last_error = None;

        for code in MAJOR_STOCKS {
            match self.market.daily_bars(code, RECENT_DAYS).await {
                Ok(bars) => {
                    let (Some((_, _, change_pct)), Some(latest)) = (last_change(&bars), bars.last()) else {
                        debug!(code, bars = bars.len(), "Not enough bars for mover");
                        continue;
                    };
                    let name = listing_names
                        .get(code)
                        .cloned()
                        .unwrap_or_else(|| format!("종목{}", code));
                    movers.push(json!({
                        "name": name,
                        "code": code,
                        "change_pct": round2(change_pct),
                        "volume": latest.volume,
                    }));
                }
                Err(e) => {
                    warn!(code, "Mover lookup failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if movers.is_empty() {
            return Err(ToolError::DataSourceUnavailable(match last_error {
                Some(e) => format!("no mover data available: {}", e),
                None => "no mover data available".to_string(),
            }));
        }

        Ok(Value::Array(movers))
    }
}

// ===== Indicators =====

pub struct MarketIndicatorsTool {
    market: Arc<dyn MarketData>,
}

impl MarketIndicatorsTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl Tool for MarketIndicatorsTool {
    fn name(&self) -> &'static str {
        names::GET_MARKET_INDICATORS
    }

    fn description(&self) -> &'static str {
        "Current KOSPI, KOSDAQ and USD/KRW levels with their daily change"
    }

    async fn execute(&self, _args: &Value) -> ToolResult {
        let mut indicators = Vec::with_capacity(INDICATORS.len());
        let mut available = 0;

        for (symbol, label) in INDICATORS {
            let change = match self.market.daily_bars(symbol, RECENT_DAYS).await {
                Ok(bars) => last_change(&bars),
                Err(e) => {
                    warn!(symbol, "Indicator lookup failed: {}", e);
                    None
                }
            };

            match change {
                Some((current, change, change_pct)) => {
                    available += 1;
                    indicators.push(json!({
                        "indicator": label,
                        "current_value": round2(current),
                        "change": round2(change),
                        "change_pct": round2(change_pct),
                    }));
                }
                None => indicators.push(json!({
                    "indicator": label,
                    "current_value": null,
                    "change": null,
                    "change_pct": null,
                })),
            }
        }

        if available == 0 {
            return Err(ToolError::DataSourceUnavailable(
                "no market indicator could be fetched".to_string(),
            ));
        }

        Ok(Value::Array(indicators))
    }
}

// ===== Price =====

pub struct StockPriceTool {
    market: Arc<dyn MarketData>,
}

impl StockPriceTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &'static str {
        names::GET_STOCK_PRICE
    }

    fn description(&self) -> &'static str {
        "Latest close, daily change, volume, high and low for a stock code"
    }

    fn parameters(&self) -> Value {
        stock_code_schema()
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let code = stock_code_arg(args)?;
        let bars = self.market.daily_bars(code, RECENT_DAYS).await?;

        let latest = bars
            .last()
            .ok_or_else(|| ToolError::NotFound(format!("no price data for {}", code)))?;
        let (_, change, change_pct) = last_change(&bars).unwrap_or((latest.close, 0.0, 0.0));

        Ok(json!({
            "stock_code": code,
            "date": latest.date,
            "current_price": latest.close,
            "change": change,
            "change_pct": round2(change_pct),
            "volume": latest.volume,
            "high": latest.high,
            "low": latest.low,
        }))
    }
}

// ===== Pattern =====

pub struct StockPatternTool {
    market: Arc<dyn MarketData>,
}

impl StockPatternTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl Tool for StockPatternTool {
    fn name(&self) -> &'static str {
        names::ANALYZE_STOCK_PATTERN
    }

    fn description(&self) -> &'static str {
        "Technical analysis over the last 90 days: moving averages, trend, MA crosses, volume trend and RSI"
    }

    fn parameters(&self) -> Value {
        stock_code_schema()
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let code = stock_code_arg(args)?;
        let bars = self.market.daily_bars(code, PATTERN_DAYS).await?;

        let report = analysis::analyze(&bars).ok_or_else(|| {
            ToolError::NotFound(format!(
                "not enough data to analyze {} ({} sessions, need {})",
                code,
                bars.len(),
                analysis::MIN_BARS
            ))
        })?;

        let patterns: Vec<&str> = match report.cross {
            Some(CrossSignal::GoldenCross) => vec!["golden_cross"],
            Some(CrossSignal::DeadCross) => vec!["dead_cross"],
            None => vec![],
        };

        Ok(json!({
            "stock_code": code,
            "current_price": report.current_price,
            "trend": report.trend,
            "patterns": patterns,
            "moving_averages": {
                "ma5": report.ma5.round(),
                "ma20": report.ma20.round(),
                "ma60": report.ma60.map(f64::round),
            },
            "indicators": {
                "rsi": (report.rsi * 10.0).round() / 10.0,
                "volume_trend": report.volume_trend,
            },
        }))
    }
}
