use std::sync::Arc;

use anyhow::Result;

use crate::address::Address;
use crate::client::{FlowdockApi, FlowdockClient};
use crate::config::FlowdockConfig;
use crate::connection::Connector;
use crate::outbound::OutboundRouter;
use crate::robot::Robot;
use crate::users::UserDirectory;

/// The adapter as an embedder sees it: one connector for the inbound stream,
/// one router for outbound replies.
pub struct FlowdockAdapter {
    connector: Arc<Connector>,
    router: OutboundRouter,
    thread_responses: bool,
}

impl FlowdockAdapter {
    /// Builds the adapter over the real Flowdock client.
    pub fn new(robot: Arc<dyn Robot>, config: &FlowdockConfig) -> Self {
        let api: Arc<dyn FlowdockApi> = Arc::new(FlowdockClient::new(
            config.api_token.clone(),
            config.organization.clone(),
        ));
        Self::with_api(robot, api, config)
    }

    /// Builds the adapter over an arbitrary transport.
    pub fn with_api(
        robot: Arc<dyn Robot>,
        api: Arc<dyn FlowdockApi>,
        config: &FlowdockConfig,
    ) -> Self {
        let users = Arc::new(UserDirectory::new(Arc::clone(&api)));
        let connector = Arc::new(Connector::new(
            Arc::clone(&api),
            robot,
            users,
            config.bot_name.clone(),
            config.flows.to_vec(),
        ));
        Self {
            connector,
            router: OutboundRouter::new(api),
            thread_responses: config.thread_responses.is_enabled(),
        }
    }

    /// How a user addresses the bot in a public flow.
    pub fn mention_format(name: &str) -> String {
        format!("@{name}")
    }

    /// Connects and starts streaming. Idempotent.
    pub async fn run(&self) -> Result<()> {
        self.connector.start().await
    }

    /// Stops streaming and notifies the robot. Idempotent.
    pub async fn shut_down(&self) {
        self.connector.shut_down().await
    }

    /// Sends the bot's replies back to where the conversation happened,
    /// honoring the configured threading behavior.
    pub async fn send_messages(&self, target: &Address, messages: &[String]) -> Result<()> {
        self.router
            .send(target, messages, self.thread_responses)
            .await
    }
}
