//! Poll state ownership.
//!
//! Every poll has one logical writer at a time. [`PollStore::writer`] hands
//! out a [`PollWriter`] guarding that poll; votes, closes and archives go
//! through it, so read-modify-write sequences on one poll never interleave
//! while different polls proceed independently.

use crate::db::{NewPoll, Poll, PollBackend, PollStatus, PollSummary, Vote, VoteRecord};
use crate::error::{BackendError, PollError};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

pub struct PollStore {
    backend: Arc<dyn PollBackend>,
    writers: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    retry: RetryPolicy,
    archive_retention: Option<Duration>,
}

impl PollStore {
    pub fn new(
        backend: Arc<dyn PollBackend>,
        retry: RetryPolicy,
        archive_retention: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            writers: Mutex::new(HashMap::new()),
            retry,
            archive_retention,
        }
    }

    pub async fn create(&self, new_poll: NewPoll) -> Result<Poll, PollError> {
        let poll = Poll::open(new_poll, Utc::now());
        self.retry("put_poll", || self.backend.put_poll(&poll))
            .await?;

        info!(poll_id = %poll.id(), options = poll.options().len(), "poll created");
        Ok(poll)
    }

    pub async fn get(&self, poll_id: Uuid) -> Result<Poll, PollError> {
        let poll = self
            .retry("get_poll", || self.backend.get_poll(poll_id))
            .await?
            .ok_or(PollError::NotFound)?;

        if self.retention_expired(&poll) {
            return Err(PollError::NotFound);
        }
        Ok(poll)
    }

    pub async fn increment_option(
        &self,
        poll_id: Uuid,
        option_index: usize,
    ) -> Result<Poll, PollError> {
        self.writer(poll_id).await?.increment_option(option_index).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<PollSummary>, PollError> {
        let polls = self
            .retry("list_recent", || self.backend.list_recent(limit))
            .await?;

        Ok(polls.iter().map(PollSummary::from).collect())
    }

    pub async fn close(&self, poll_id: Uuid, owner_id: &str) -> Result<Poll, PollError> {
        self.writer(poll_id)
            .await?
            .transition(owner_id, PollStatus::Closed)
            .await
    }

    pub async fn archive(&self, poll_id: Uuid, owner_id: &str) -> Result<Poll, PollError> {
        self.writer(poll_id)
            .await?
            .transition(owner_id, PollStatus::Archived)
            .await
    }

    /// Waits for exclusive write access to one poll.
    ///
    /// Unknown ids fail before a lock slot is allocated for them.
    pub async fn writer(&self, poll_id: Uuid) -> Result<PollWriter<'_>, PollError> {
        self.get(poll_id).await?;

        let lock = {
            let mut writers = self.writers.lock();
            Arc::clone(writers.entry(poll_id).or_default())
        };

        Ok(PollWriter {
            store: self,
            poll_id,
            guard: Some(lock.lock_owned().await),
        })
    }

    /// Drops the poll's lock slot unless another task holds or awaits it.
    fn release_writer(&self, poll_id: Uuid) {
        let mut writers = self.writers.lock();
        // clones are only taken under this lock
        if writers
            .get(&poll_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            writers.remove(&poll_id);
        }
    }

    fn retention_expired(&self, poll: &Poll) -> bool {
        let (Some(retention), Some(archived_at)) = (self.archive_retention, poll.archived_at())
        else {
            return false;
        };

        Utc::now()
            .signed_duration_since(archived_at)
            .to_std()
            .map(|age| age >= retention)
            .unwrap_or(false)
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(op, attempt, ?delay, "backend call failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(op, attempt, "backend call failed: {e}");
                    return Err(PollError::Unavailable);
                }
            }
        }
    }
}

/// Exclusive write access to a single poll, released on drop.
pub struct PollWriter<'a> {
    store: &'a PollStore,
    poll_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PollWriter<'_> {
    pub async fn snapshot(&self) -> Result<Poll, PollError> {
        self.store.get(self.poll_id).await
    }

    pub async fn record_vote_if_absent(&self, vote: &Vote) -> Result<VoteRecord, PollError> {
        self.store
            .retry("record_vote_if_absent", || {
                self.store.backend.record_vote_if_absent(vote)
            })
            .await
    }

    pub async fn find_vote(&self, voter_id: &str) -> Result<Option<Vote>, PollError> {
        self.store
            .retry("find_vote", || {
                self.store.backend.find_vote(self.poll_id, voter_id)
            })
            .await
    }

    pub async fn increment_option(&self, option_index: usize) -> Result<Poll, PollError> {
        let poll = self.snapshot().await?;
        if option_index >= poll.options().len() {
            return Err(PollError::InvalidOption(format!(
                "option {option_index} does not exist, poll has {} options",
                poll.options().len()
            )));
        }

        let at = Utc::now();
        self.store
            .retry("atomic_increment", || {
                self.store
                    .backend
                    .atomic_increment(self.poll_id, option_index, at)
            })
            .await?
            .ok_or(PollError::NotFound)
    }

    async fn transition(&self, owner_id: &str, target: PollStatus) -> Result<Poll, PollError> {
        let mut poll = self.snapshot().await?;
        if poll.owner_id() != owner_id {
            return Err(PollError::NotOwner);
        }

        match (poll.status(), target) {
            (current, target) if current == target => return Ok(poll),
            // archiving already stopped voting
            (PollStatus::Archived, PollStatus::Closed) => return Ok(poll),
            _ => {}
        }

        poll.set_status(target, Utc::now());
        self.store
            .retry("put_poll", || self.store.backend.put_poll(&poll))
            .await?;

        info!(poll_id = %poll.id(), status = %poll.status(), "poll status changed");
        Ok(poll)
    }
}

impl Drop for PollWriter<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.release_writer(self.poll_id);
    }
}
