use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::FlowdockApi;
use crate::event::de_id;

/// A Flowdock user record as returned by `/user/{id}` and `/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    #[serde(deserialize_with = "de_id")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nick: String,
}

/// A locally known user: remote id, display name, mention handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub nick: String,
}

impl From<RemoteUser> for User {
    fn from(remote: RemoteUser) -> Self {
        Self {
            id: remote.id,
            name: remote.name,
            nick: remote.nick,
        }
    }
}

/// Resolves remote user ids to local [`User`] records, fetching and creating
/// them on first sight.
///
/// The directory lives in memory for the lifetime of the process; it is
/// repopulated from `/users` every time the connection is established, so
/// nothing is lost across restarts.
pub struct UserDirectory {
    api: Arc<dyn FlowdockApi>,
    users: Mutex<HashMap<u64, User>>,
    // Per-id gates so concurrent resolves of one unknown user fetch once.
    creating: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl UserDirectory {
    pub fn new(api: Arc<dyn FlowdockApi>) -> Self {
        Self {
            api,
            users: Mutex::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
        }
    }

    /// The cached user, if any. Never fetches.
    pub async fn get(&self, id: u64) -> Option<User> {
        self.users.lock().await.get(&id).cloned()
    }

    /// Looks up a user by remote id, fetching and recording it on first
    /// sight. A failed fetch propagates; there is no default user.
    pub async fn resolve(&self, id: u64) -> Result<User> {
        if let Some(user) = self.get(id).await {
            return Ok(user);
        }

        let gate = {
            let mut creating = self.creating.lock().await;
            Arc::clone(creating.entry(id).or_default())
        };
        let _held = gate.lock().await;

        // Whoever held the gate before us may have created the user already.
        if let Some(user) = self.get(id).await {
            return Ok(user);
        }

        let remote = self
            .api
            .get_user(id)
            .await
            .with_context(|| format!("failed to fetch user {id}"))?;
        let user = User::from(remote);
        debug!(id, nick = %user.nick, "created user");
        self.users.lock().await.insert(id, user.clone());
        self.creating.lock().await.remove(&id);
        Ok(user)
    }

    /// Records every not-yet-known user in the batch. Known users are left
    /// untouched.
    pub async fn bulk_sync(&self, records: Vec<RemoteUser>) {
        let mut users = self.users.lock().await;
        for record in records {
            if let Entry::Vacant(slot) = users.entry(record.id) {
                slot.insert(User::from(record));
            }
        }
    }
}
