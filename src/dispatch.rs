use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::address::Address;
use crate::client::FlowdockApi;
use crate::event::{ChatEvent, Event};
use crate::robot::{NormalizedMessage, Robot};
use crate::users::UserDirectory;

/// Routes classified events: chat goes to the robot, membership actions
/// refresh the user directory, everything else is logged and dropped.
///
/// Stateless per event; `bot_id` is resolved once at connect time and is what
/// keeps the bot from hearing its own output.
pub struct Dispatcher {
    robot: Arc<dyn Robot>,
    users: Arc<UserDirectory>,
    api: Arc<dyn FlowdockApi>,
    bot_id: u64,
}

impl Dispatcher {
    pub fn new(
        robot: Arc<dyn Robot>,
        users: Arc<UserDirectory>,
        api: Arc<dyn FlowdockApi>,
        bot_id: u64,
    ) -> Self {
        Self {
            robot,
            users,
            api,
            bot_id,
        }
    }

    /// Handles one event. At most one message reaches the robot per call; an
    /// error means this event was skipped, never that the stream should stop.
    pub async fn dispatch(&self, event: Event) -> Result<()> {
        match event {
            Event::Message(chat) | Event::Comment(chat) => self.handle_chat(chat).await,
            Event::UserActivity => {
                debug!("user activity ping");
                Ok(())
            }
            Event::Action { action_type } => self.handle_action(action_type.as_deref()).await,
            Event::Unknown(discriminator) => {
                debug!(%discriminator, "ignoring unknown event type");
                Ok(())
            }
            Event::Malformed { event, reason } => {
                warn!(%event, %reason, "dropping malformed event");
                Ok(())
            }
        }
    }

    async fn handle_chat(&self, chat: ChatEvent) -> Result<()> {
        let sender = self.users.resolve(chat.user).await?;
        if sender.id == self.bot_id {
            debug!(id = chat.id, "suppressing own message");
            return Ok(());
        }

        let address = Address::for_inbound(&chat);
        let mut body = chat.body;
        // Private conversations don't require mention syntax, so make the
        // message look addressed before the pipeline sees it.
        let handle = self.robot.mention_handle();
        if address.is_private() && !body.contains(handle) {
            body = format!("{handle} {body}");
        }

        debug!(sender = %sender.nick, flow = ?address.flow, "dispatching message");
        self.robot
            .receive(NormalizedMessage {
                sender,
                address,
                body,
            })
            .await;
        Ok(())
    }

    async fn handle_action(&self, action_type: Option<&str>) -> Result<()> {
        match action_type {
            Some("add_people") | Some("join") => {
                debug!("flow membership changed, syncing users");
                let members = self
                    .api
                    .list_users()
                    .await
                    .context("failed to list users after membership change")?;
                self.users.bulk_sync(members).await;
                Ok(())
            }
            other => {
                debug!(action = ?other, "ignoring action");
                Ok(())
            }
        }
    }
}
