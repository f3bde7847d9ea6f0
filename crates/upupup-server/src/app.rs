//! Router assembly.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{access, health, hook, ingest, metrics, readiness};

pub fn build_router(state: AppState) -> Router {
    let log_requests = state.config.server.log_requests;
    let mut router = Router::new()
        .route("/healthcheck", get(health::handle))
        .route("/readiness", get(readiness::handle))
        .route("/api/hook/:hook_id", post(hook::handle))
        .route("/api/metrics/:check_id", get(metrics::handle))
        // retained for scrapers configured against the old path
        .route("/api/data/:check_id", get(metrics::handle))
        .route(
            "/api/ingest/:node_id",
            post(ingest::handle)
                .layer(DefaultBodyLimit::max(ingest::MAX_INGEST_PAYLOAD_BYTES + 1)),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access::ip_allow_middleware,
        ));
    if log_requests {
        router = router.layer(TraceLayer::new_for_http());
    }
    router.with_state(state)
}
