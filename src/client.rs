use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::event::RawEvent;
use crate::users::RemoteUser;

const API_BASE: &str = "https://api.flowdock.com";
const STREAM_BASE: &str = "https://stream.flowdock.com";

/// The Flowdock transport as the adapter consumes it. Implemented for real by
/// [`FlowdockClient`] and by scripted doubles in tests.
#[async_trait]
pub trait FlowdockApi: Send + Sync {
    /// Opens the streaming connection for the given flows.
    async fn connect(&self, flows: &[String]) -> Result<Box<dyn EventStream>>;

    async fn get_user(&self, id: u64) -> Result<RemoteUser>;

    async fn list_users(&self) -> Result<Vec<RemoteUser>>;

    /// Posts messages to a flow, in order.
    async fn post_message(&self, flow: &str, messages: &[String]) -> Result<()>;

    /// Posts messages as comments under a thread root, in order.
    async fn post_comment(&self, flow: &str, parent: u64, messages: &[String]) -> Result<()>;

    /// Posts messages privately to a user, in order.
    async fn post_private(&self, user: u64, messages: &[String]) -> Result<()>;
}

/// One open streaming connection. Dropping it closes the transport.
#[async_trait]
pub trait EventStream: Send {
    /// The next decoded event; `Ok(None)` when the remote closed the stream,
    /// `Err` on a transport failure.
    async fn next_event(&mut self) -> Result<Option<RawEvent>>;
}

/// Real Flowdock client: REST calls against `api.flowdock.com` and the
/// long-lived streaming request against `stream.flowdock.com`, authenticated
/// with the api token as basic-auth username.
pub struct FlowdockClient {
    http: reqwest::Client,
    token: String,
    organization: String,
    api_base: String,
    stream_base: String,
}

impl FlowdockClient {
    pub fn new(token: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            organization: organization.into(),
            api_base: API_BASE.to_string(),
            stream_base: STREAM_BASE.to_string(),
        }
    }

    /// Overrides the API endpoints; useful against a staging environment or a
    /// local stub server.
    pub fn with_bases(mut self, api_base: impl Into<String>, stream_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.stream_base = stream_base.into();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.token, Some(""))
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GET {url} returned {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode response from {url}"))
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(url)
            .basic_auth(&self.token, Some(""))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("POST {url} returned {status}: {text}");
        }
        Ok(())
    }
}

#[async_trait]
impl FlowdockApi for FlowdockClient {
    async fn connect(&self, flows: &[String]) -> Result<Box<dyn EventStream>> {
        let url = format!(
            "{}/flows?filter={}",
            self.stream_base,
            stream_filter(&self.organization, flows)
        );
        debug!(%url, "opening stream");

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.token, Some(""))
            .header("Accept", "application/json")
            .send()
            .await
            .context("streaming request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("stream connect returned {status}");
        }
        Ok(Box::new(HttpEventStream {
            response,
            buf: Vec::new(),
        }))
    }

    async fn get_user(&self, id: u64) -> Result<RemoteUser> {
        self.get_json(&format!("/user/{id}")).await
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>> {
        self.get_json("/users").await
    }

    async fn post_message(&self, flow: &str, messages: &[String]) -> Result<()> {
        let url = format!(
            "{}/flows/{}/{}/messages",
            self.api_base, self.organization, flow
        );
        for text in messages {
            self.post(&url, json!({ "event": "message", "content": text }))
                .await?;
        }
        Ok(())
    }

    async fn post_comment(&self, flow: &str, parent: u64, messages: &[String]) -> Result<()> {
        let url = format!(
            "{}/flows/{}/{}/messages/{}/comments",
            self.api_base, self.organization, flow, parent
        );
        for text in messages {
            self.post(&url, json!({ "event": "comment", "content": text }))
                .await?;
        }
        Ok(())
    }

    async fn post_private(&self, user: u64, messages: &[String]) -> Result<()> {
        let url = format!("{}/private/{}/messages", self.api_base, user);
        for text in messages {
            self.post(&url, json!({ "event": "message", "content": text }))
                .await?;
        }
        Ok(())
    }
}

fn stream_filter(organization: &str, flows: &[String]) -> String {
    flows
        .iter()
        .map(|flow| format!("{organization}/{flow}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// The streaming response body: newline-delimited JSON with blank keepalive
/// lines in between.
struct HttpEventStream {
    response: reqwest::Response,
    buf: Vec<u8>,
}

#[async_trait]
impl EventStream for HttpEventStream {
    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        loop {
            if let Some(event) = next_buffered_event(&mut self.buf) {
                return Ok(Some(event));
            }
            match self.response.chunk().await.context("stream read failed")? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
    }
}

/// Decodes the next complete line in the buffer. Keepalive blank lines and
/// undecodable lines are skipped.
fn next_buffered_event(buf: &mut Vec<u8>) -> Option<RawEvent> {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => return Some(event),
            Err(error) => warn!(%error, "skipping undecodable stream line"),
        }
    }
    None
}
