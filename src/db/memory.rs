use crate::db::backend::PollBackend;
use crate::db::models::{Poll, PollStatus, Vote, VoteRecord};
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local backend used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    polls: RwLock<HashMap<Uuid, Poll>>,
    votes: RwLock<HashMap<(Uuid, String), Vote>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn poll_count(&self) -> usize {
        self.polls.read().await.len()
    }

    pub async fn vote_count(&self) -> usize {
        self.votes.read().await.len()
    }
}

#[async_trait]
impl PollBackend for MemoryBackend {
    async fn put_poll(&self, poll: &Poll) -> Result<(), BackendError> {
        self.polls.write().await.insert(poll.id(), poll.clone());
        Ok(())
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, BackendError> {
        Ok(self.polls.read().await.get(&poll_id).cloned())
    }

    async fn atomic_increment(
        &self,
        poll_id: Uuid,
        option_index: usize,
        at: DateTime<Utc>,
    ) -> Result<Option<Poll>, BackendError> {
        let mut polls = self.polls.write().await;
        let Some(poll) = polls.get_mut(&poll_id) else {
            return Ok(None);
        };
        if !poll.increment(option_index, at) {
            return Err(BackendError::Fatal(format!(
                "option {option_index} out of range for poll {poll_id}"
            )));
        }
        Ok(Some(poll.clone()))
    }

    async fn record_vote_if_absent(&self, vote: &Vote) -> Result<VoteRecord, BackendError> {
        let mut votes = self.votes.write().await;
        let key = (vote.poll_id, vote.voter_id.clone());
        if let Some(existing) = votes.get(&key) {
            return Ok(VoteRecord::Existing(existing.clone()));
        }
        votes.insert(key, vote.clone());
        Ok(VoteRecord::Inserted)
    }

    async fn find_vote(&self, poll_id: Uuid, voter_id: &str) -> Result<Option<Vote>, BackendError> {
        let votes = self.votes.read().await;
        Ok(votes.get(&(poll_id, voter_id.to_string())).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Poll>, BackendError> {
        let polls = self.polls.read().await;
        let mut results: Vec<Poll> = polls
            .values()
            .filter(|p| p.status() != PollStatus::Archived)
            .cloned()
            .collect();
        drop(polls);

        results.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        results.truncate(limit);
        Ok(results)
    }
}
