use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::address::Address;
use crate::client::FlowdockApi;

/// Routes the bot's replies back to Flowdock: threaded or flat into a flow,
/// or privately to a user. One transport call per batch, order preserved, no
/// retries; a failed send is the caller's problem.
pub struct OutboundRouter {
    api: Arc<dyn FlowdockApi>,
}

impl OutboundRouter {
    pub fn new(api: Arc<dyn FlowdockApi>) -> Self {
        Self { api }
    }

    pub async fn send(
        &self,
        target: &Address,
        messages: &[String],
        thread_enabled: bool,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let out = target.for_outbound(thread_enabled);
        if out.is_private() {
            let user = out.user.context("private target without a user id")?;
            debug!(user, count = messages.len(), "sending private messages");
            self.api.post_private(user, messages).await
        } else {
            let flow = out.flow.as_deref().context("public target without a flow")?;
            match out.parent {
                Some(parent) => {
                    debug!(flow, parent, count = messages.len(), "sending threaded messages");
                    self.api.post_comment(flow, parent, messages).await
                }
                None => {
                    debug!(flow, count = messages.len(), "sending messages");
                    self.api.post_message(flow, messages).await
                }
            }
        }
    }
}
