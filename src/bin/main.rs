use multi_agent_advisor::{config::Config, orchestrator::Orchestrator, session::Session};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Investor profile the CLI session starts with
fn sample_profile() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("name".to_string(), "김투자".to_string()),
        ("age".to_string(), "35".to_string()),
        ("investment_experience".to_string(), "3년".to_string()),
        ("risk_tolerance".to_string(), "중립형".to_string()),
        ("portfolio".to_string(), "005930, 000660, 035420".to_string()),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so replies stay readable on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(Config::from_env()?);
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);
    let session = Session::new(sample_profile());

    info!(session_id = %session.id(), "Advisor CLI started");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all("멀티 에이전트 투자 어드바이저입니다. /reset 으로 대화를 초기화하고 /quit 으로 종료합니다.\n".as_bytes())
        .await?;

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();

        match message {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset()?;
                stdout.write_all("대화가 초기화되었습니다.\n".as_bytes()).await?;
                continue;
            }
            _ => {}
        }

        let outcome = session.run_turn(&orchestrator, message).await?;

        if let Some(progress) = outcome.agent_contexts.last_output().map(|o| &o.progress_description) {
            stdout.write_all(format!("[{}]\n", progress).as_bytes()).await?;
        }
        stdout.write_all(outcome.response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;

        if let Some(reason) = &outcome.abort_reason {
            info!(turn_id = %outcome.turn_id, reason = %reason, "Turn aborted");
        }
    }

    Ok(())
}
