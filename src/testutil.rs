//! Scripted doubles for the transport and the robot pipeline, shared by the
//! unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::client::{EventStream, FlowdockApi};
use crate::event::RawEvent;
use crate::robot::{NormalizedMessage, Robot};
use crate::users::RemoteUser;

pub(crate) fn remote_user(id: u64, name: &str, nick: &str) -> RemoteUser {
    RemoteUser {
        id,
        name: name.to_string(),
        nick: nick.to_string(),
    }
}

/// Decodes a JSON literal the way the stream decoder would.
pub(crate) fn raw(json: serde_json::Value) -> RawEvent {
    serde_json::from_value(json).expect("test event must decode")
}

/// Polls until the condition holds; panics after two seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// One scripted item of a mock stream.
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    Event(serde_json::Value),
    /// Transport failure; the connector treats it as transient.
    Error(&'static str),
    /// Remote closed the stream cleanly.
    Eof,
}

struct MockStream {
    items: VecDeque<StreamItem>,
}

#[async_trait]
impl EventStream for MockStream {
    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        match self.items.pop_front() {
            Some(StreamItem::Event(value)) => {
                Ok(Some(serde_json::from_value(value).expect("scripted event")))
            }
            Some(StreamItem::Error(message)) => Err(anyhow!(message)),
            Some(StreamItem::Eof) => Ok(None),
            // Script exhausted: behave like a quiet connection.
            None => std::future::pending().await,
        }
    }
}

/// An outbound call recorded by [`MockApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Post {
    Message { flow: String, messages: Vec<String> },
    Comment { flow: String, parent: u64, messages: Vec<String> },
    Private { user: u64, messages: Vec<String> },
}

/// Scripted transport: a user table, a queue of stream scripts (one per
/// `connect`), and a record of every outbound post.
pub(crate) struct MockApi {
    users: Mutex<HashMap<u64, RemoteUser>>,
    streams: Mutex<VecDeque<Result<Vec<StreamItem>, String>>>,
    posts: Mutex<Vec<Post>>,
    fetch_delay: Duration,
    pub(crate) user_fetches: AtomicUsize,
    pub(crate) list_calls: AtomicUsize,
    pub(crate) connect_calls: AtomicUsize,
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            streams: Mutex::new(VecDeque::new()),
            posts: Mutex::new(Vec::new()),
            fetch_delay: Duration::ZERO,
            user_fetches: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_users(self, users: Vec<RemoteUser>) -> Self {
        {
            let mut table = self.users.lock().unwrap();
            for user in users {
                table.insert(user.id, user);
            }
        }
        self
    }

    /// Scripts the next `connect` call to succeed with these items.
    pub(crate) fn with_stream(self, items: Vec<StreamItem>) -> Self {
        self.streams.lock().unwrap().push_back(Ok(items));
        self
    }

    /// Scripts the next `connect` call to fail.
    pub(crate) fn with_connect_error(self, message: &str) -> Self {
        self.streams.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    /// Makes `get_user` take a while, to widen race windows.
    pub(crate) fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub(crate) fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlowdockApi for MockApi {
    async fn connect(&self, _flows: &[String]) -> Result<Box<dyn EventStream>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().pop_front() {
            Some(Ok(items)) => Ok(Box::new(MockStream {
                items: items.into(),
            })),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no stream scripted")),
        }
    }

    async fn get_user(&self, id: u64) -> Result<RemoteUser> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let user = self.users.lock().unwrap().get(&id).cloned();
        match user {
            Some(user) => Ok(user),
            None => bail!("user {id} not found"),
        }
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut users: Vec<RemoteUser> = self.users.lock().unwrap().values().cloned().collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    async fn post_message(&self, flow: &str, messages: &[String]) -> Result<()> {
        self.posts.lock().unwrap().push(Post::Message {
            flow: flow.to_string(),
            messages: messages.to_vec(),
        });
        Ok(())
    }

    async fn post_comment(&self, flow: &str, parent: u64, messages: &[String]) -> Result<()> {
        self.posts.lock().unwrap().push(Post::Comment {
            flow: flow.to_string(),
            parent,
            messages: messages.to_vec(),
        });
        Ok(())
    }

    async fn post_private(&self, user: u64, messages: &[String]) -> Result<()> {
        self.posts.lock().unwrap().push(Post::Private {
            user,
            messages: messages.to_vec(),
        });
        Ok(())
    }
}

/// Recording pipeline double.
pub(crate) struct MockRobot {
    handle: String,
    receive_delay: Duration,
    received_messages: Mutex<Vec<NormalizedMessage>>,
    pub(crate) disconnects: AtomicUsize,
}

impl MockRobot {
    pub(crate) fn new(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            receive_delay: Duration::ZERO,
            received_messages: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Makes `receive` slow, for tests that need a dispatch in flight.
    pub(crate) fn with_receive_delay(mut self, delay: Duration) -> Self {
        self.receive_delay = delay;
        self
    }

    pub(crate) fn received(&self) -> Vec<NormalizedMessage> {
        self.received_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Robot for MockRobot {
    async fn receive(&self, message: NormalizedMessage) {
        if !self.receive_delay.is_zero() {
            tokio::time::sleep(self.receive_delay).await;
        }
        self.received_messages.lock().unwrap().push(message);
    }

    fn mention_handle(&self) -> &str {
        &self.handle
    }

    async fn notify_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
