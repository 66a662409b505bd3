use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{EventStream, FlowdockApi};
use crate::dispatch::Dispatcher;
use crate::event::classify;
use crate::robot::Robot;
use crate::users::UserDirectory;

/// Lifecycle of the streaming connection. Owned by the connector; nothing
/// else writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    ShuttingDown,
    Stopped,
}

/// Owns the streaming connection: connect, read loop, reconnect on transient
/// failure, explicit shutdown.
///
/// The read loop runs as its own task and is the only producer of inbound
/// dispatch calls, so dispatch order always matches stream arrival order.
pub struct Connector {
    api: Arc<dyn FlowdockApi>,
    robot: Arc<dyn Robot>,
    users: Arc<UserDirectory>,
    bot_name: String,
    flows: Vec<String>,
    reconnect_delay: Duration,
    state: Arc<Mutex<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    pub fn new(
        api: Arc<dyn FlowdockApi>,
        robot: Arc<dyn Robot>,
        users: Arc<UserDirectory>,
        bot_name: String,
        flows: Vec<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            api,
            robot,
            users,
            bot_name,
            flows,
            reconnect_delay: Duration::from_secs(2),
            state: Arc::new(Mutex::new(ConnectionState::Idle)),
            shutdown,
            reader: Mutex::new(None),
        }
    }

    /// How long to wait between reconnect attempts after a stream drop.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Opens the streaming connection, resolves the bot's own user id, and
    /// starts the read loop. A second call after a successful start is a
    /// no-op; a failure to connect or to identify the bot is fatal and
    /// propagates.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != ConnectionState::Idle {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        let (stream, dispatcher) = match self.establish().await {
            Ok(established) => established,
            Err(error) => {
                let mut state = self.state.lock().await;
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Stopped;
                }
                return Err(error);
            }
        };

        {
            let mut state = self.state.lock().await;
            if *state != ConnectionState::Connecting {
                // shut_down won the race while we were connecting.
                return Ok(());
            }
            *state = ConnectionState::Streaming;
        }
        info!(flows = ?self.flows, "connected to flowdock");

        let read_loop = ReadLoop {
            api: Arc::clone(&self.api),
            state: Arc::clone(&self.state),
            flows: self.flows.clone(),
            reconnect_delay: self.reconnect_delay,
            dispatcher,
            shutdown: self.shutdown.subscribe(),
        };
        *self.reader.lock().await = Some(tokio::spawn(read_loop.run(stream)));
        Ok(())
    }

    async fn establish(&self) -> Result<(Box<dyn EventStream>, Dispatcher)> {
        let stream = self
            .api
            .connect(&self.flows)
            .await
            .context("failed to open streaming connection")?;

        let members = self
            .api
            .list_users()
            .await
            .context("failed to list organization users")?;
        let bot_id = members
            .iter()
            .find(|member| member.nick.eq_ignore_ascii_case(&self.bot_name))
            .map(|member| member.id)
            .with_context(|| {
                format!("bot user {:?} not found in the organization", self.bot_name)
            })?;
        self.users.bulk_sync(members).await;
        debug!(bot_id, "resolved own user id");

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.robot),
            Arc::clone(&self.users),
            Arc::clone(&self.api),
            bot_id,
        );
        Ok((stream, dispatcher))
    }

    /// Stops the read loop, waiting for any in-flight dispatch to finish
    /// before the transport goes away. Safe to call at any time, from any
    /// task, any number of times; only the call that actually stops a running
    /// connection notifies the robot.
    pub async fn shut_down(&self) {
        {
            let mut state = self.state.lock().await;
            match *state {
                ConnectionState::Connecting | ConnectionState::Streaming => {
                    *state = ConnectionState::ShuttingDown;
                }
                _ => return,
            }
        }

        let _ = self.shutdown.send(true);
        let handle = self.reader.lock().await.take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(%error, "read loop task failed");
            }
        }

        *self.state.lock().await = ConnectionState::Stopped;
        info!("disconnected");
        self.robot.notify_disconnected().await;
    }
}

/// The spawned half of the connector. Consumes one event at a time, in
/// arrival order; dispatch finishes before the next read, so slow handling
/// delays the stream instead of dropping or reordering events.
struct ReadLoop {
    api: Arc<dyn FlowdockApi>,
    state: Arc<Mutex<ConnectionState>>,
    flows: Vec<String>,
    reconnect_delay: Duration,
    dispatcher: Dispatcher,
    shutdown: watch::Receiver<bool>,
}

impl ReadLoop {
    async fn run(mut self, mut stream: Box<dyn EventStream>) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                _ = self.shutdown.changed() => break,
                event = stream.next_event() => event,
            };
            match next {
                Ok(Some(raw)) => {
                    if let Err(error) = self.dispatcher.dispatch(classify(raw)).await {
                        warn!(%error, "event dispatch failed");
                    }
                }
                Ok(None) => {
                    info!("stream closed by remote");
                    match self.reconnect().await {
                        Some(fresh) => stream = fresh,
                        None => break,
                    }
                }
                Err(error) => {
                    warn!(%error, "stream interrupted");
                    match self.reconnect().await {
                        Some(fresh) => stream = fresh,
                        None => break,
                    }
                }
            }
        }
        debug!("read loop finished");
    }

    /// Re-opens the stream after a transient drop, retrying until it works.
    /// Returns `None` when shutdown was requested while waiting. Events that
    /// occurred during the gap are gone; there is no replay cursor.
    async fn reconnect(&mut self) -> Option<Box<dyn EventStream>> {
        *self.state.lock().await = ConnectionState::Connecting;
        loop {
            let attempt = tokio::select! {
                _ = self.shutdown.changed() => return None,
                attempt = self.api.connect(&self.flows) => attempt,
            };
            match attempt {
                Ok(stream) => {
                    *self.state.lock().await = ConnectionState::Streaming;
                    info!("reconnected to flowdock");
                    return Some(stream);
                }
                Err(error) => {
                    warn!(%error, "reconnect failed, retrying");
                    tokio::select! {
                        _ = self.shutdown.changed() => return None,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
    }
}
