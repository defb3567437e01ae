use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};

use aily_bus::EventBus;
use aily_core::config::AilyConfig;
use aily_host::HostExecutor;
use aily_platform::manager::AdapterManager;
use aily_registry::SessionRegistry;
use aily_sched::TranscriptScraper;
use aily_store::bindings::ThreadBindings;
use aily_store::prefs::Preferences;
use aily_store::MessageStore;

use crate::rate_limit::RateLimiter;

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: AilyConfig,
    pub bus: Arc<EventBus>,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<MessageStore>,
    pub bindings: Arc<ThreadBindings>,
    pub prefs: Preferences,
    pub executor: Arc<HostExecutor>,
    pub adapters: Arc<AdapterManager>,
    pub router: Arc<aily_router::Router>,
    pub scraper: Arc<TranscriptScraper>,
    pub rate_limiter: RateLimiter,
    /// Live streaming clients, bounded by `MAX_STREAM_CLIENTS`.
    pub stream_clients: AtomicUsize,
    /// Monotonic sequence stamped onto outgoing stream events.
    pub event_seq: AtomicU64,
    pub started_at: DateTime<Utc>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::healthz))
        .route(
            "/api/sessions",
            get(crate::http::sessions::list).post(crate::http::sessions::create),
        )
        .route(
            "/api/sessions/bulk-delete",
            post(crate::http::sessions::bulk_delete),
        )
        .route(
            "/api/sessions/{name}",
            get(crate::http::sessions::detail).delete(crate::http::sessions::kill),
        )
        .route(
            "/api/sessions/{name}/messages",
            get(crate::http::messages::page),
        )
        .route("/api/sessions/{name}/send", post(crate::http::messages::send))
        .route("/api/sessions/{name}/sync", post(crate::http::messages::sync))
        .route(
            "/api/sessions/{name}/capture",
            get(crate::http::messages::capture),
        )
        .route("/api/search", get(crate::http::messages::search))
        .route("/api/stats", get(crate::http::stats::stats))
        .route(
            "/api/preferences",
            get(crate::http::prefs::get_prefs).put(crate::http::prefs::put_prefs),
        )
        .route("/api/hooks/event", post(crate::http::hooks::hook_event))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
