use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowbot::adapter::FlowdockAdapter;
use flowbot::config::Config;
use flowbot::robot::{NormalizedMessage, Robot};

/// Stand-in pipeline for running the adapter on its own: logs whatever the
/// stream delivers. Embedders wire up their own [`Robot`].
struct LoggingRobot {
    mention_handle: String,
}

#[async_trait]
impl Robot for LoggingRobot {
    async fn receive(&self, message: NormalizedMessage) {
        info!(
            sender = %message.sender.nick,
            flow = ?message.address.flow,
            body = %message.body,
            "received message"
        );
    }

    fn mention_handle(&self) -> &str {
        &self.mention_handle
    }

    async fn notify_disconnected(&self) {
        info!("pipeline notified of disconnect");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("  Organization: {}", config.flowdock.organization);
    info!("  Flows: {:?}", config.flowdock.flows.to_vec());
    info!("  Bot name: {}", config.flowdock.bot_name);

    let robot = Arc::new(LoggingRobot {
        mention_handle: config.flowdock.bot_name.clone(),
    });
    let adapter = FlowdockAdapter::new(robot, &config.flowdock);

    adapter.run().await?;
    info!("Streaming; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    adapter.shut_down().await;

    Ok(())
}
