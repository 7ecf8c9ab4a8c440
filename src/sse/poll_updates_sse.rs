use crate::db::Poll;
use crate::error::{ApiError, PollError};
use crate::polls::PollResponse;
use crate::sse::models::{FeedEvent, ObserverHandle};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tokio::sync::broadcast::error::RecvError;

enum Next {
    Snapshot(Option<Result<Poll, PollError>>),
    Feed(Result<FeedEvent, RecvError>),
}

pub(crate) fn error_event(error: &ApiError) -> Event {
    Event::default()
        .event("error")
        .data(json!({"error": error.code.as_str(), "details": error.message}).to_string())
}

pub async fn poll_updates_sse(
    Extension(app_state): Extension<AppState>,
    Path(poll_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut feed = app_state.service.feed();
    let mut subscription = app_state
        .service
        .subscribe_live(&poll_id, ObserverHandle::new())
        .await?;
    let watched = subscription.poll_id();

    let stream = async_stream::stream! {
        let mut first = true;
        loop {
            let next = tokio::select! {
                item = subscription.next() => Next::Snapshot(item),
                event = feed.recv() => Next::Feed(event),
            };

            match next {
                Next::Snapshot(Some(Ok(poll))) => {
                    let name = if first { "init" } else { "vote_update" };
                    first = false;
                    yield Ok(Event::default()
                        .event(name)
                        .data(json!({"poll": PollResponse::from(&poll)}).to_string()));
                }
                Next::Snapshot(Some(Err(e))) => {
                    yield Ok(error_event(&ApiError::from(e)));
                }
                Next::Snapshot(None) => break,
                Next::Feed(Ok(FeedEvent::PollClosed { poll_id })) if poll_id == watched => {
                    yield Ok(Event::default()
                        .event("poll_closed")
                        .data(json!({"poll_id": poll_id}).to_string()));
                }
                Next::Feed(Ok(FeedEvent::PollArchived { poll_id })) if poll_id == watched => {
                    yield Ok(Event::default()
                        .event("poll_archived")
                        .data(json!({"poll_id": poll_id}).to_string()));
                }
                Next::Feed(Err(RecvError::Closed)) => break,
                // other polls' events, or a lagged feed: snapshots still carry the state
                Next::Feed(_) => {}
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    ))
}
