use crate::db::backend::PollBackend;
use crate::db::connection::DbPool;
use crate::db::models::{Poll, PollOption, PollStatus, Vote, VoteRecord};
use crate::db::repositories::{self, PollOptionRow, PollRow, VoteRow};
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// PostgreSQL-backed poll storage.
#[derive(Clone)]
pub struct PgBackend {
    pool: DbPool,
}

impl PgBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn assemble(row: PollRow, options: Vec<PollOptionRow>) -> Result<Poll, BackendError> {
    let status: PollStatus = row.status.parse().map_err(BackendError::Fatal)?;
    let options = options
        .into_iter()
        .map(|o| PollOption {
            label: o.label,
            votes: u64::try_from(o.votes).unwrap_or(0),
        })
        .collect();

    Poll::restore(
        row.id,
        row.name,
        options,
        row.owner_id,
        status,
        row.created_at,
        row.updated_at,
        row.archived_at,
    )
    .ok_or_else(|| BackendError::Fatal(format!("poll {} has a malformed option set", row.id)))
}

fn vote_from_row(row: VoteRow) -> Vote {
    Vote {
        poll_id: row.poll_id,
        option_index: usize::try_from(row.option_index).unwrap_or(usize::MAX),
        voter_id: row.voter_id,
        cast_at: row.cast_at,
    }
}

#[async_trait]
impl PollBackend for PgBackend {
    async fn put_poll(&self, poll: &Poll) -> Result<(), BackendError> {
        repositories::upsert_poll(&self.pool, poll).await?;
        Ok(())
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, BackendError> {
        let Some(row) = repositories::get_poll_row(&self.pool, poll_id).await? else {
            return Ok(None);
        };
        let options = repositories::get_poll_options(&self.pool, poll_id).await?;
        assemble(row, options).map(Some)
    }

    async fn atomic_increment(
        &self,
        poll_id: Uuid,
        option_index: usize,
        at: DateTime<Utc>,
    ) -> Result<Option<Poll>, BackendError> {
        let position = i32::try_from(option_index)
            .map_err(|_| BackendError::Fatal(format!("option index {option_index} too large")))?;

        if !repositories::increment_option(&self.pool, poll_id, position, at).await? {
            return match self.get_poll(poll_id).await? {
                None => Ok(None),
                Some(_) => Err(BackendError::Fatal(format!(
                    "option {option_index} out of range for poll {poll_id}"
                ))),
            };
        }

        self.get_poll(poll_id).await
    }

    async fn record_vote_if_absent(&self, vote: &Vote) -> Result<VoteRecord, BackendError> {
        let record = match repositories::insert_vote_if_absent(&self.pool, vote).await? {
            None => VoteRecord::Inserted,
            Some(existing) => VoteRecord::Existing(vote_from_row(existing)),
        };
        Ok(record)
    }

    async fn find_vote(&self, poll_id: Uuid, voter_id: &str) -> Result<Option<Vote>, BackendError> {
        let row = repositories::get_vote(&self.pool, poll_id, voter_id).await?;
        Ok(row.map(vote_from_row))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Poll>, BackendError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = repositories::get_recent_poll_rows(&self.pool, limit).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut options_by_poll: HashMap<Uuid, Vec<PollOptionRow>> = HashMap::new();
        for option in repositories::get_options_for_polls(&self.pool, &ids).await? {
            options_by_poll.entry(option.poll_id).or_default().push(option);
        }

        rows.into_iter()
            .map(|row| {
                let options = options_by_poll.remove(&row.id).unwrap_or_default();
                assemble(row, options)
            })
            .collect()
    }
}
