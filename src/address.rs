use crate::event::ChatEvent;

/// A conversation target: where a message came from, and where a reply to it
/// should go.
///
/// Privacy is derived, not stored: an address is private exactly when it has
/// no flow, so the two can never disagree. `user` carries the peer of a
/// private conversation and is what outbound private routing replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub flow: Option<String>,
    pub user: Option<u64>,
    pub parent: Option<u64>,
}

impl Address {
    pub fn is_private(&self) -> bool {
        self.flow.is_none()
    }

    /// Provenance of an inbound chat event. Comments point at their thread
    /// root; top-level messages point at themselves, so replies can thread
    /// under them.
    pub fn for_inbound(event: &ChatEvent) -> Self {
        Self {
            flow: event.flow.clone(),
            user: Some(event.user),
            parent: Some(event.thread_root.unwrap_or(event.id)),
        }
    }

    /// Where a reply to this address goes. Private stays private and flat;
    /// public replies thread under the original parent only when threading is
    /// enabled.
    pub fn for_outbound(&self, thread_enabled: bool) -> Self {
        if self.is_private() {
            Self {
                flow: None,
                user: self.user,
                parent: None,
            }
        } else {
            Self {
                flow: self.flow.clone(),
                user: None,
                parent: if thread_enabled { self.parent } else { None },
            }
        }
    }
}
