//! distcalc - coordinator entry point
//!
//! Starts the HTTP server that accepts expressions and dispatches tasks.

use distcalc::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "distcalc=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: queue_capacity={}, service_times={:?}",
        config.scheduler.queue_capacity, config.service_times
    );

    api::serve(config).await?;

    Ok(())
}
