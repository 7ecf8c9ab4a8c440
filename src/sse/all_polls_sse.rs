use crate::db::PollSummary;
use crate::error::ApiError;
use crate::sse::poll_updates_sse::error_event;
use crate::startup::AppState;
use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

fn init_event(result: Result<Vec<PollSummary>, ApiError>) -> Event {
    match result {
        Ok(polls) => Event::default()
            .event("init")
            .data(json!({"polls": polls}).to_string()),
        Err(e) => error_event(&e),
    }
}

/// Recent polls followed by their lifecycle events.
pub async fn all_polls_sse(
    Extension(app_state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // subscribe before the initial read so nothing falls in between
    let mut feed = BroadcastStream::new(app_state.service.feed());
    let service = app_state.service.clone();

    let stream = async_stream::stream! {
        yield Ok(init_event(service.recent_polls(None).await));

        while let Some(item) = feed.next().await {
            match item {
                Ok(event) => {
                    yield Ok(Event::default()
                        .event(event.event_name())
                        .data(json!(event).to_string()));
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "live poll feed lagged, resending recent polls");
                    yield Ok(init_event(service.recent_polls(None).await));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
