use crate::db::PollSummary;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identifies one watcher of a poll. Opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ObserverHandle(Uuid);

impl ObserverHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ObserverHandle {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle events behind the "recent live polls" view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    PollCreated { poll: PollSummary },
    PollUpdated { poll: PollSummary },
    PollClosed { poll_id: Uuid },
    PollArchived { poll_id: Uuid },
}

impl FeedEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            FeedEvent::PollCreated { .. } => "poll_created",
            FeedEvent::PollUpdated { .. } => "poll_updated",
            FeedEvent::PollClosed { .. } => "poll_closed",
            FeedEvent::PollArchived { .. } => "poll_archived",
        }
    }
}

pub type FeedSender = tokio::sync::broadcast::Sender<FeedEvent>;
