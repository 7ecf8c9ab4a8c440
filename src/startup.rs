use crate::config::Config;
use crate::db::{self, MemoryBackend, PgBackend, PollBackend};
use crate::polls::{
    VOTER_HEADER, archive_poll, close_poll, create_poll, get_poll, list_recent_polls,
    vote_on_poll,
};
use crate::service::PollService;
use crate::sse::{all_polls_sse, poll_updates_sse};
use axum::{
    Router,
    extract::Extension,
    http::{
        HeaderName, Method, StatusCode,
        header::{ACCEPT, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: PollService,
}

impl AppState {
    /// Connects to PostgreSQL when `DATABASE_URL` is set, otherwise keeps
    /// polls in memory.
    pub async fn new(config: Config) -> Result<Self, sqlx::Error> {
        let backend: Arc<dyn PollBackend> = match &config.database_url {
            Some(url) => {
                let pool = db::init_db(url, config.db_max_connections).await?;
                info!("using PostgreSQL poll storage");
                spawn_health_check(PgBackend::new(pool.clone()));
                Arc::new(PgBackend::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set, polls are kept in memory");
                Arc::new(MemoryBackend::new())
            }
        };

        Ok(Self::with_backend(backend, config))
    }

    pub fn in_memory(config: Config) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), config)
    }

    pub fn with_backend(backend: Arc<dyn PollBackend>, config: Config) -> Self {
        AppState {
            service: PollService::new(backend, &config),
        }
    }
}

fn spawn_health_check(backend: PgBackend) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match backend.pool().acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", db::pool_stats(backend.pool()));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    });
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/polls", post(create_poll))
        .route("/polls/recent", get(list_recent_polls))
        .route("/polls/live", get(all_polls_sse))
        .route("/polls/:poll_id", get(get_poll))
        .route("/polls/:poll_id/votes", post(vote_on_poll))
        .route("/polls/:poll_id/close", post(close_poll))
        .route("/polls/:poll_id/archive", post(archive_poll))
        .route("/polls/:poll_id/live", get(poll_updates_sse))
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
                .allow_headers([
                    CONTENT_TYPE,
                    ACCEPT,
                    HeaderName::from_static(VOTER_HEADER),
                ]),
        )
        .layer(TraceLayer::new_for_http())
        .fallback(handler_404)
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
