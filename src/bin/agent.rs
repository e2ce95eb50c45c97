//! distcalc-agent - worker entry point
//!
//! Runs `COMPUTING_POWER` worker loops against the coordinator at
//! `ORCHESTRATOR_URL`.

use distcalc::{agent::Agent, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "distcalc=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Agent starting with {} computing power against {}",
        config.agent.computing_power, config.agent.orchestrator_url
    );

    Agent::from_config(config.agent).run().await;

    Ok(())
}
