//! Flowdock streaming adapter: bridges the Flowdock real-time API to a generic
//! chat-bot message pipeline.
//!
//! The adapter keeps a persistent streaming connection open, classifies every
//! event that arrives, resolves posting users (creating local records on first
//! sight), and hands normalized messages to the pipeline behind the
//! [`robot::Robot`] trait. Replies from the pipeline are routed back to the
//! right flow, thread, or private conversation by the outbound router.

pub mod adapter;
pub mod address;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod event;
pub mod outbound;
pub mod robot;
pub mod users;

#[cfg(test)]
pub(crate) mod testutil;
