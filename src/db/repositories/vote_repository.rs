use crate::db::connection::DbPool;
use crate::db::models::Vote;
use chrono::{DateTime, Utc};
use sqlx::Error;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VoteRow {
    pub poll_id: Uuid,
    pub voter_id: String,
    pub option_index: i32,
    pub cast_at: DateTime<Utc>,
}

/// Inserts the vote unless the voter already has one on this poll.
/// Returns the earlier row in that case, `None` when the insert happened.
pub async fn insert_vote_if_absent(pool: &DbPool, vote: &Vote) -> Result<Option<VoteRow>, Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO votes (poll_id, voter_id, option_index, cast_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (poll_id, voter_id) DO NOTHING
        "#,
    )
    .bind(vote.poll_id)
    .bind(&vote.voter_id)
    .bind(vote.option_index as i32)
    .bind(vote.cast_at)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 1 {
        return Ok(None);
    }

    // the conflicting row is never deleted, so it is still there
    get_vote(pool, vote.poll_id, &vote.voter_id)
        .await?
        .map(Some)
        .ok_or(Error::RowNotFound)
}

pub async fn get_vote(
    pool: &DbPool,
    poll_id: Uuid,
    voter_id: &str,
) -> Result<Option<VoteRow>, Error> {
    sqlx::query_as::<_, VoteRow>(
        "SELECT poll_id, voter_id, option_index, cast_at FROM votes WHERE poll_id = $1 AND voter_id = $2",
    )
    .bind(poll_id)
    .bind(voter_id)
    .fetch_optional(pool)
    .await
}
