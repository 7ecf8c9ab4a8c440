use crate::db::models::{Poll, Vote, VoteRecord};
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage primitives the poll core is written against.
///
/// Implementations must make `atomic_increment` and `record_vote_if_absent`
/// atomic with respect to concurrent callers; everything above this trait
/// relies on nothing else from the storage technology.
#[async_trait]
pub trait PollBackend: Send + Sync {
    /// Inserts or replaces the poll row. Option labels are never rewritten.
    async fn put_poll(&self, poll: &Poll) -> Result<(), BackendError>;

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, BackendError>;

    /// Adds one vote to the option and bumps `updated_at`. Returns the new
    /// state, or `None` when the poll does not exist.
    async fn atomic_increment(
        &self,
        poll_id: Uuid,
        option_index: usize,
        at: DateTime<Utc>,
    ) -> Result<Option<Poll>, BackendError>;

    /// Stores the (poll, voter) pair unless one already exists, in which case
    /// the earlier vote is returned untouched.
    async fn record_vote_if_absent(&self, vote: &Vote) -> Result<VoteRecord, BackendError>;

    /// The voter's vote on this poll, if any. Never writes.
    async fn find_vote(&self, poll_id: Uuid, voter_id: &str) -> Result<Option<Vote>, BackendError>;

    /// Non-archived polls, most recently updated first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Poll>, BackendError>;
}
