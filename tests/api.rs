use axum::{
    Router,
    body::{Body, BodyDataStream, to_bytes},
    http::{Request, StatusCode},
};
use futures::StreamExt;
use live_polls::Config;
use live_polls::startup::{AppState, router};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

fn app() -> Router {
    router(AppState::in_memory(Config::default()))
}

/// Reads `text/event-stream` frames off a response body.
struct EventReader {
    body: BodyDataStream,
    buf: String,
}

impl EventReader {
    async fn open(app: &Router, uri: &str) -> Self {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        Self {
            body: response.into_body().into_data_stream(),
            buf: String::new(),
        }
    }

    /// Next named event and its JSON data. Comment frames are skipped.
    async fn next(&mut self) -> (String, Value) {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let frame: String = self.buf.drain(..end + 2).collect();
                let mut name = None;
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = Some(v.trim().to_string());
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim());
                    }
                }
                if let Some(name) = name {
                    return (name, serde_json::from_str(&data).unwrap());
                }
                continue;
            }

            let chunk = timeout(Duration::from_secs(2), self.body.next())
                .await
                .expect("no event within timeout")
                .expect("event stream ended")
                .unwrap();
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, voter: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(voter) = voter {
        builder = builder.header("x-voter-id", voter);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn create_lunch(app: &Router) -> String {
    let (status, body) = send(
        app,
        post(
            "/polls",
            Some("owner"),
            json!({"name": "Lunch", "options": ["Pizza", "Salad"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn lunch_poll_end_to_end() {
    let app = app();
    let id = create_lunch(&app).await;

    let vote = |voter: &'static str| post(&format!("/polls/{id}/votes"), Some(voter), json!({"option_index": 0}));

    let (status, body) = send(&app, vote("voterA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_applied"], false);

    send(&app, vote("voterB")).await;

    let (status, body) = send(&app, vote("voterA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_applied"], true);

    let (status, body) = send(&app, get(&format!("/polls/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["options"][0]["label"], "Pizza");
    assert_eq!(body["options"][0]["votes"], 2);
    assert_eq!(body["options"][1]["votes"], 0);
    assert_eq!(body["total_votes"], 2);
    assert!(body.get("owner_id").is_none());
}

#[tokio::test]
async fn invalid_poll_is_rejected() {
    let app = app();
    let (status, body) = send(
        &app,
        post("/polls", Some("owner"), json!({"name": "Lunch", "options": ["Pizza"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_poll");

    let (_, recent) = send(&app, get("/polls/recent")).await;
    assert_eq!(recent, json!([]));
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = app();
    let (status, body) = send(
        &app,
        post("/polls", None, json!({"name": "Lunch", "options": ["Pizza", "Salad"]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn error_codes_map_to_statuses() {
    let app = app();
    let id = create_lunch(&app).await;

    let (status, body) = send(&app, get("/polls/0b5f8b9e-0000-4000-8000-000000000000")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send(
        &app,
        post(&format!("/polls/{id}/votes"), Some("voterA"), json!({"option_index": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_option");

    send(
        &app,
        post(&format!("/polls/{id}/votes"), Some("voterA"), json!({"option_index": 0})),
    )
    .await;
    let (status, body) = send(
        &app,
        post(&format!("/polls/{id}/votes"), Some("voterA"), json!({"option_index": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_vote");

    let (status, body) = send(&app, post(&format!("/polls/{id}/close"), Some("voterA"), json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn archived_polls_leave_recent_but_stay_joinable() {
    let app = app();
    let kept = create_lunch(&app).await;
    let archived = create_lunch(&app).await;

    let (status, body) = send(&app, post(&format!("/polls/{archived}/archive"), Some("owner"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "archived");

    let (_, recent) = send(&app, get("/polls/recent?limit=5")).await;
    let ids: Vec<&str> = recent
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![kept.as_str()]);

    let (status, _) = send(&app, get(&format!("/polls/{archived}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        post(&format!("/polls/{archived}/votes"), Some("voterA"), json!({"option_index": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "poll_closed");
}

#[tokio::test]
async fn poll_stream_sends_snapshots_then_lifecycle() {
    let app = app();
    let id = create_lunch(&app).await;
    let mut events = EventReader::open(&app, &format!("/polls/{id}/live")).await;

    let (name, data) = events.next().await;
    assert_eq!(name, "init");
    assert_eq!(data["poll"]["total_votes"], 0);

    for (voter, option) in [("voterA", 1), ("voterB", 0), ("voterC", 1)] {
        send(
            &app,
            post(&format!("/polls/{id}/votes"), Some(voter), json!({"option_index": option})),
        )
        .await;
    }

    let mut totals = Vec::new();
    for _ in 0..3 {
        let (name, data) = events.next().await;
        assert_eq!(name, "vote_update");
        totals.push(data["poll"]["total_votes"].as_u64().unwrap());
    }
    assert_eq!(totals, vec![1, 2, 3]);

    send(&app, post(&format!("/polls/{id}/close"), Some("owner"), json!({}))).await;
    let (name, data) = events.next().await;
    assert_eq!(name, "poll_closed");
    assert_eq!(data["poll_id"], id.as_str());

    send(&app, post(&format!("/polls/{id}/archive"), Some("owner"), json!({}))).await;
    let (name, _) = events.next().await;
    assert_eq!(name, "poll_archived");
}

#[tokio::test]
async fn poll_stream_for_unknown_poll_is_not_found() {
    let app = app();
    let (status, body) = send(&app, get("/polls/not-a-poll/live")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn feed_stream_lists_recent_then_follows_events() {
    let app = app();
    let existing = create_lunch(&app).await;
    let mut events = EventReader::open(&app, "/polls/live").await;

    let (name, data) = events.next().await;
    assert_eq!(name, "init");
    assert_eq!(data["polls"][0]["id"], existing.as_str());

    let created = create_lunch(&app).await;
    let (name, data) = events.next().await;
    assert_eq!(name, "poll_created");
    assert_eq!(data["poll"]["id"], created.as_str());

    send(
        &app,
        post(&format!("/polls/{created}/votes"), Some("voterA"), json!({"option_index": 0})),
    )
    .await;
    let (name, data) = events.next().await;
    assert_eq!(name, "poll_updated");
    assert_eq!(data["poll"]["total_votes"], 1);
}

#[tokio::test]
async fn lagging_feed_stream_resyncs_with_recent_polls() {
    let config = Config {
        feed_capacity: 1,
        ..Config::default()
    };
    let app = router(AppState::in_memory(config));
    let mut events = EventReader::open(&app, "/polls/live").await;

    // nothing has read the stream yet, so all but the newest event is lost
    for _ in 0..3 {
        create_lunch(&app).await;
    }

    let (name, data) = events.next().await;
    assert_eq!(name, "init");
    assert_eq!(data["polls"].as_array().unwrap().len(), 3);

    let (name, data) = events.next().await;
    assert_eq!(name, "init");
    assert_eq!(data["polls"].as_array().unwrap().len(), 3);

    let (name, _) = events.next().await;
    assert_eq!(name, "poll_created");
}
