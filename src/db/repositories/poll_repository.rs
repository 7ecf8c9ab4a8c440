use crate::db::connection::DbPool;
use crate::db::models::Poll;
use chrono::{DateTime, Utc};
use sqlx::Error;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollOptionRow {
    pub poll_id: Uuid,
    pub position: i32,
    pub label: String,
    pub votes: i64,
}

/// Writes the poll row and, on first insert, its options. Existing option
/// rows are left alone so counts are only ever changed by `increment_option`.
pub async fn upsert_poll(pool: &DbPool, poll: &Poll) -> Result<(), Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO polls (id, name, owner_id, status, created_at, updated_at, archived_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at,
            archived_at = EXCLUDED.archived_at
        "#,
    )
    .bind(poll.id())
    .bind(poll.name())
    .bind(poll.owner_id())
    .bind(poll.status().as_str())
    .bind(poll.created_at())
    .bind(poll.updated_at())
    .bind(poll.archived_at())
    .execute(&mut *tx)
    .await?;

    for (position, option) in poll.options().iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO poll_options (poll_id, position, label, votes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (poll_id, position) DO NOTHING
            "#,
        )
        .bind(poll.id())
        .bind(position as i32)
        .bind(&option.label)
        .bind(i64::try_from(option.votes).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_poll_row(pool: &DbPool, poll_id: Uuid) -> Result<Option<PollRow>, Error> {
    sqlx::query_as::<_, PollRow>(
        "SELECT id, name, owner_id, status, created_at, updated_at, archived_at FROM polls WHERE id = $1",
    )
    .bind(poll_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_poll_options(pool: &DbPool, poll_id: Uuid) -> Result<Vec<PollOptionRow>, Error> {
    sqlx::query_as::<_, PollOptionRow>(
        "SELECT poll_id, position, label, votes FROM poll_options WHERE poll_id = $1 ORDER BY position",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await
}

pub async fn get_recent_poll_rows(pool: &DbPool, limit: i64) -> Result<Vec<PollRow>, Error> {
    sqlx::query_as::<_, PollRow>(
        r#"
        SELECT id, name, owner_id, status, created_at, updated_at, archived_at
        FROM polls
        WHERE status <> 'archived'
        ORDER BY updated_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn get_options_for_polls(
    pool: &DbPool,
    poll_ids: &[Uuid],
) -> Result<Vec<PollOptionRow>, Error> {
    sqlx::query_as::<_, PollOptionRow>(
        "SELECT poll_id, position, label, votes FROM poll_options WHERE poll_id = ANY($1) ORDER BY poll_id, position",
    )
    .bind(poll_ids)
    .fetch_all(pool)
    .await
}

/// Returns false when no option row matched.
pub async fn increment_option(
    pool: &DbPool,
    poll_id: Uuid,
    position: i32,
    at: DateTime<Utc>,
) -> Result<bool, Error> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE poll_options SET votes = votes + 1 WHERE poll_id = $1 AND position = $2",
    )
    .bind(poll_id)
    .bind(position)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("UPDATE polls SET updated_at = $2 WHERE id = $1")
        .bind(poll_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}
