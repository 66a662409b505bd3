use async_trait::async_trait;

use crate::address::Address;
use crate::users::User;

/// An inbound message normalized for the bot pipeline. Built once per
/// dispatched event; the pipeline owns it from `receive` on.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub sender: User,
    pub address: Address,
    pub body: String,
}

/// The bot framework the adapter feeds. The framework's command routing and
/// plugins live behind this boundary; the adapter never looks past it.
#[async_trait]
pub trait Robot: Send + Sync {
    /// Hands an inbound message to the pipeline. The adapter ignores the
    /// outcome; what happens to the message is the pipeline's business.
    async fn receive(&self, message: NormalizedMessage);

    /// The token users type to address the bot in a public flow.
    fn mention_handle(&self) -> &str;

    /// Called once after a user-initiated shutdown has completed.
    async fn notify_disconnected(&self);
}
