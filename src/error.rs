use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Internal failure kinds raised by the store, vote processor and hub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Invalid poll: {0}")]
    InvalidPoll(String),
    #[error("Invalid option: {0}")]
    InvalidOption(String),
    #[error("Poll not found")]
    NotFound,
    #[error("Voter already voted on this poll")]
    DuplicateVote,
    #[error("Poll is closed")]
    PollClosed,
    #[error("Only the poll owner may do that")]
    NotOwner,
    #[error("Subscriber fell behind and was dropped")]
    SubscriptionOverflow,
    #[error("Poll storage is unavailable")]
    Unavailable,
}

/// Failures reported by a persistence backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Worth retrying: connection loss, pool exhaustion, timeouts.
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => BackendError::Transient(error.to_string()),
            other => BackendError::Fatal(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Stable codes handed to callers of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPoll,
    InvalidOption,
    NotFound,
    DuplicateVote,
    PollClosed,
    Forbidden,
    SubscriptionOverflow,
    Unavailable,
    Unauthorized,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPoll => "invalid_poll",
            ErrorCode::InvalidOption => "invalid_option",
            ErrorCode::NotFound => "not_found",
            ErrorCode::DuplicateVote => "duplicate_vote",
            ErrorCode::PollClosed => "poll_closed",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::SubscriptionOverflow => "subscription_overflow",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Unauthorized => "unauthorized",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidPoll | ErrorCode::InvalidOption => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::DuplicateVote
            | ErrorCode::PollClosed
            | ErrorCode::SubscriptionOverflow => StatusCode::CONFLICT,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Error returned across the service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            code: ErrorCode::Unauthorized,
            message: "Missing voter identity".to_string(),
        }
    }
}

impl From<PollError> for ApiError {
    fn from(error: PollError) -> Self {
        let code = match &error {
            PollError::InvalidPoll(_) => ErrorCode::InvalidPoll,
            PollError::InvalidOption(_) => ErrorCode::InvalidOption,
            PollError::NotFound => ErrorCode::NotFound,
            PollError::DuplicateVote => ErrorCode::DuplicateVote,
            PollError::PollClosed => ErrorCode::PollClosed,
            PollError::NotOwner => ErrorCode::Forbidden,
            PollError::SubscriptionOverflow => ErrorCode::SubscriptionOverflow,
            PollError::Unavailable => ErrorCode::Unavailable,
        };
        Self {
            code,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code.as_str(),
            "details": self.message,
        }));

        (self.code.status(), body).into_response()
    }
}
