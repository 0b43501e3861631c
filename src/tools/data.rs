//! Read-only market data sources
//!
//! Adapters only see the [`MarketData`], [`NewsFeed`] and [`CompanyDirectory`]
//! traits. [`MarketDataApi`] implements all three against a JSON REST service.

use crate::error::ToolError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One daily OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A listed security
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub market: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsItem {
    pub title: String,
    pub info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompanyProfile {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub financial_summary: serde_json::Value,
    #[serde(default)]
    pub industry_comparison: serde_json::Value,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Daily bars covering the last `days` calendar days, oldest first
    async fn daily_bars(&self, symbol: &str, days: u32) -> Result<Vec<DailyBar>, ToolError>;

    async fn listings(&self) -> Result<Vec<Listing>, ToolError>;
}

#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn latest(&self, limit: usize) -> Result<Vec<NewsItem>, ToolError>;
}

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn company_profile(&self, code: &str) -> Result<CompanyProfile, ToolError>;
}

/// The three data sources handed to the adapter set
#[derive(Clone)]
pub struct DataSources {
    pub market: Arc<dyn MarketData>,
    pub news: Arc<dyn NewsFeed>,
    pub companies: Arc<dyn CompanyDirectory>,
}

impl DataSources {
    pub fn from_api(api: MarketDataApi) -> Self {
        let api = Arc::new(api);
        Self {
            market: api.clone(),
            news: api.clone(),
            companies: api,
        }
    }
}

/// HTTP client for the market data service.
///
/// When no base URL is configured every call fails with
/// `DataSourceUnavailable`, so the agents still run and degrade.
#[derive(Clone)]
pub struct MarketDataApi {
    client: Client,
    base_url: Option<Url>,
}

impl MarketDataApi {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        let base_url = match base_url {
            Some(raw) => Some(Url::parse(raw.trim_end_matches('/')).map_err(|e| {
                crate::error::OrchestrationError::Config(format!(
                    "MARKET_DATA_BASE_URL is not a valid URL: {}",
                    e
                ))
            })?),
            None => None,
        };

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ToolError> {
        let mut url = self.base_url.clone().ok_or_else(|| {
            ToolError::DataSourceUnavailable("MARKET_DATA_BASE_URL is not configured".to_string())
        })?;

        url.path_segments_mut()
            .map_err(|_| ToolError::DataSourceUnavailable("market data URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ToolError> {
        let url = self.endpoint(segments)?;
        let resource = segments.join("/");
        debug!(%url, "Market data request");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                warn!(resource = %resource, "Market data request failed: {}", e);
                ToolError::DataSourceUnavailable(format!("request for {} failed: {}", resource, e))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound(format!("{} not found", resource)));
        }
        if !status.is_success() {
            return Err(ToolError::DataSourceUnavailable(format!(
                "market data service returned {} for {}",
                status, resource
            )));
        }

        response.json::<T>().await.map_err(|e| {
            ToolError::DataSourceUnavailable(format!("invalid response for {}: {}", resource, e))
        })
    }
}

#[async_trait]
impl MarketData for MarketDataApi {
    async fn daily_bars(&self, symbol: &str, days: u32) -> Result<Vec<DailyBar>, ToolError> {
        let mut bars: Vec<DailyBar> = self
            .get_json(&["v1", "bars", symbol], &[("days", days.to_string())])
            .await?;
        bars.sort_by_key(|bar| bar.date);
        Ok(bars)
    }

    async fn listings(&self) -> Result<Vec<Listing>, ToolError> {
        self.get_json(&["v1", "listings"], &[]).await
    }
}

#[async_trait]
impl NewsFeed for MarketDataApi {
    async fn latest(&self, limit: usize) -> Result<Vec<NewsItem>, ToolError> {
        self.get_json(&["v1", "news"], &[("limit", limit.to_string())]).await
    }
}

#[async_trait]
impl CompanyDirectory for MarketDataApi {
    async fn company_profile(&self, code: &str) -> Result<CompanyProfile, ToolError> {
        self.get_json(&["v1", "companies", code], &[]).await
    }
}
