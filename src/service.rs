use crate::config::Config;
use crate::db::{NewPoll, Poll, PollBackend, PollSummary};
use crate::error::{ApiError, PollError};
use crate::sse::{FeedEvent, ObserverHandle, Subscription, SubscriptionHub};
use crate::store::{PollStore, RetryPolicy};
use crate::votes::{VoteProcessor, VoteReceipt};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Limits applied to caller input before it reaches the store.
#[derive(Debug, Clone, Copy)]
pub struct InputLimits {
    pub max_name_len: usize,
    pub max_option_len: usize,
    pub recent_limit_default: usize,
    pub recent_limit_max: usize,
}

impl From<&Config> for InputLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_name_len: config.max_name_len,
            max_option_len: config.max_option_len,
            recent_limit_default: config.recent_limit_default,
            recent_limit_max: config.recent_limit_max,
        }
    }
}

/// Entry point for the UI layer: create, join, vote and watch polls.
#[derive(Clone)]
pub struct PollService {
    store: Arc<PollStore>,
    votes: Arc<VoteProcessor>,
    hub: Arc<SubscriptionHub>,
    limits: InputLimits,
}

impl PollService {
    pub fn new(backend: Arc<dyn PollBackend>, config: &Config) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.retry_attempts,
            base_delay: config.retry_base_delay,
        };
        let store = Arc::new(PollStore::new(backend, retry, config.archive_retention));
        let hub = Arc::new(SubscriptionHub::new(
            Arc::clone(&store),
            config.subscriber_buffer,
            config.feed_capacity,
        ));
        let votes = Arc::new(VoteProcessor::new(Arc::clone(&store), Arc::clone(&hub)));

        Self {
            store,
            votes,
            hub,
            limits: InputLimits::from(config),
        }
    }

    pub async fn create_poll(
        &self,
        name: &str,
        options: &[String],
        owner_id: &str,
    ) -> Result<Poll, ApiError> {
        let name = normalize(name, self.limits.max_name_len);
        let labels = options
            .iter()
            .map(|o| normalize(o, self.limits.max_option_len))
            .collect();

        let new_poll = NewPoll::new(name, labels, owner_id)?;
        let poll = self.store.create(new_poll).await?;
        self.hub.announce(FeedEvent::PollCreated {
            poll: PollSummary::from(&poll),
        });
        Ok(poll)
    }

    pub async fn join_poll(&self, poll_id: &str) -> Result<Poll, ApiError> {
        let poll_id = parse_poll_id(poll_id)?;
        Ok(self.store.get(poll_id).await?)
    }

    pub async fn vote(
        &self,
        poll_id: &str,
        option_index: usize,
        voter_id: &str,
    ) -> Result<VoteReceipt, ApiError> {
        let poll_id = parse_poll_id(poll_id)?;
        Ok(self.votes.submit_vote(poll_id, option_index, voter_id).await?)
    }

    pub async fn subscribe_live(
        &self,
        poll_id: &str,
        observer: ObserverHandle,
    ) -> Result<Subscription, ApiError> {
        let poll_id = parse_poll_id(poll_id)?;
        Ok(self.hub.subscribe(poll_id, observer).await?)
    }

    pub fn unsubscribe(&self, poll_id: &str, observer: ObserverHandle) {
        if let Ok(poll_id) = parse_poll_id(poll_id) {
            self.hub.unsubscribe(poll_id, observer);
        }
    }

    /// Recent non-archived polls. `None` uses the configured default.
    pub async fn recent_polls(&self, limit: Option<usize>) -> Result<Vec<PollSummary>, ApiError> {
        let limit = limit
            .unwrap_or(self.limits.recent_limit_default)
            .clamp(1, self.limits.recent_limit_max);
        Ok(self.store.recent(limit).await?)
    }

    pub async fn close_poll(&self, poll_id: &str, owner_id: &str) -> Result<Poll, ApiError> {
        let poll_id = parse_poll_id(poll_id)?;
        let poll = self.store.close(poll_id, owner_id).await?;
        self.hub.announce(FeedEvent::PollClosed { poll_id });
        Ok(poll)
    }

    pub async fn archive_poll(&self, poll_id: &str, owner_id: &str) -> Result<Poll, ApiError> {
        let poll_id = parse_poll_id(poll_id)?;
        let poll = self.store.archive(poll_id, owner_id).await?;
        self.hub.announce(FeedEvent::PollArchived { poll_id });
        Ok(poll)
    }

    pub fn feed(&self) -> broadcast::Receiver<FeedEvent> {
        self.hub.feed()
    }

    pub fn subscriber_count(&self, poll_id: Uuid) -> usize {
        self.hub.subscriber_count(poll_id)
    }
}

fn parse_poll_id(raw: &str) -> Result<Uuid, PollError> {
    Uuid::parse_str(raw.trim()).map_err(|_| PollError::NotFound)
}

/// Trims and truncates to at most `max_chars` characters.
fn normalize(raw: &str, max_chars: usize) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}
