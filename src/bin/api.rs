use multi_agent_advisor::{api::start_server, config::Config, orchestrator::Orchestrator};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Loads .env before reading the environment
    let config = Arc::new(Config::from_env()?);

    if config.llm.api_key.is_empty() {
        warn!("⚠️  OPENAI_API_KEY not set, every model call will fail");
    }
    if config.market_data_base_url.is_none() {
        warn!("⚠️  MARKET_DATA_BASE_URL not set, market tools will report the source unavailable");
    }

    info!("🚀 Multi-agent advisor - API Server");
    info!("📍 Port: {}", config.api_port);

    let orchestrator = Arc::new(Orchestrator::from_config(config.clone())?);

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, config.api_port).await?;

    Ok(())
}
