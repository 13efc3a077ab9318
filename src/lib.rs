pub mod auth;
pub mod challenges;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod db;
pub mod decisions;
pub mod error;
pub mod expenses;
pub mod feed;
pub mod groups;
pub mod live;
pub mod models;
pub mod reconcile;
pub mod reducer;
pub mod routes;

use axum::{Router, routing::get};
use sqlx::SqlitePool;
use std::sync::Arc;
use time::Duration;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tower_sessions::{Expiry, SessionManagerLayer, cookie::SameSite};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::Level;

use crate::consensus::InFlight;
use crate::feed::{ChangeFeed, FeedConfig};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub feed: Arc<ChangeFeed>,
    pub resolving: InFlight,
}

impl AppState {
    pub fn new(db: SqlitePool, feed_config: FeedConfig) -> Self {
        Self {
            db,
            feed: Arc::new(ChangeFeed::new(feed_config)),
            resolving: InFlight::new(),
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Build the full Axum application router.
///
/// Caller is responsible for running database migrations on `state.db`
/// beforehand. This function sets up the session store (and migrates its
/// table), then assembles all route modules, middleware, and state.
pub async fn build_app(state: AppState, secure_cookies: bool) -> Result<Router, sqlx::Error> {
    let session_store = SqliteStore::new(state.db.clone());
    session_store.migrate().await?;

    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(Duration::days(30)))
        .with_secure(secure_cookies)
        .with_http_only(true)
        .with_same_site(SameSite::Lax);

    let router = Router::new()
        .route("/health", get(health))
        .merge(routes::auth::router())
        .merge(routes::groups::router())
        .merge(routes::decisions::router())
        .merge(routes::expenses::router())
        .merge(routes::challenges::router())
        .merge(routes::realtime::router())
        .layer(session_layer)
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state);

    Ok(router)
}
