use crate::db::{Poll, PollOption, PollStatus, PollSummary};
use crate::error::ApiError;
use crate::startup::AppState;
use crate::votes::VoteReceipt;
use axum::{
    async_trait,
    extract::{Extension, FromRequestParts, Json, Path, Query},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const VOTER_HEADER: &str = "x-voter-id";

/// Opaque caller identity supplied by whatever authenticates the request.
#[derive(Debug, Clone)]
pub struct VoterId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for VoterId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(VOTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| VoterId(v.to_string()))
            .ok_or_else(ApiError::unauthorized)
    }
}

// Request/Response DTOs
#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub name: String,
    pub options: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub option_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub id: Uuid,
    pub name: String,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Poll> for PollResponse {
    fn from(poll: &Poll) -> Self {
        Self {
            id: poll.id(),
            name: poll.name().to_string(),
            options: poll.options().to_vec(),
            total_votes: poll.total_votes(),
            status: poll.status(),
            created_at: poll.created_at(),
            updated_at: poll.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub success: bool,
    pub already_applied: bool,
    pub message: String,
    pub poll: PollResponse,
}

impl From<VoteReceipt> for VoteResponse {
    fn from(receipt: VoteReceipt) -> Self {
        let message = if receipt.already_applied {
            "Vote was already recorded"
        } else {
            "Vote recorded successfully"
        };
        Self {
            success: true,
            already_applied: receipt.already_applied,
            message: message.to_string(),
            poll: PollResponse::from(&receipt.snapshot),
        }
    }
}

/// Create a new poll owned by the caller
pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    VoterId(owner_id): VoterId,
    Json(payload): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = app_state
        .service
        .create_poll(&payload.name, &payload.options, &owner_id)
        .await?;

    Ok((StatusCode::CREATED, Json(PollResponse::from(&poll))))
}

/// Most recently active polls, archived ones excluded
pub async fn list_recent_polls(
    Extension(app_state): Extension<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<PollSummary>>, ApiError> {
    let polls = app_state.service.recent_polls(query.limit).await?;
    Ok(Json(polls))
}

/// Join a poll by id
pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = app_state.service.join_poll(&poll_id).await?;
    Ok((StatusCode::OK, Json(PollResponse::from(&poll))))
}

pub async fn vote_on_poll(
    Extension(app_state): Extension<AppState>,
    VoterId(voter_id): VoterId,
    Path(poll_id): Path<String>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = app_state
        .service
        .vote(&poll_id, payload.option_index, &voter_id)
        .await?;

    Ok((StatusCode::OK, Json(VoteResponse::from(receipt))))
}

/// Close a poll (only the owner can close)
pub async fn close_poll(
    Extension(app_state): Extension<AppState>,
    VoterId(owner_id): VoterId,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = app_state.service.close_poll(&poll_id, &owner_id).await?;
    Ok((StatusCode::OK, Json(PollResponse::from(&poll))))
}

/// Archive a poll (only the owner can archive)
pub async fn archive_poll(
    Extension(app_state): Extension<AppState>,
    VoterId(owner_id): VoterId,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let poll = app_state.service.archive_poll(&poll_id, &owner_id).await?;
    Ok((StatusCode::OK, Json(PollResponse::from(&poll))))
}
