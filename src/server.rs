use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use callmeter::metrics::stream;
use callmeter::middleware::transaction_middleware;

use crate::handlers;
use crate::AppState;

/// Builds the full Axum `Router`: user endpoints, metrics endpoints and
/// the per-request transaction layer.
pub fn create_router(state: Arc<AppState>) -> Router {
    let meter = state.meter.clone();

    Router::new()
        // ── User endpoints ──────────────────────────────────────
        .route("/api/users/:id", get(handlers::users::get_user))
        .route("/api/users", post(handlers::users::create_user))
        .with_state(state)
        // ── Metrics ─────────────────────────────────────────────
        .merge(stream::routes(meter.clone()))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(meter, transaction_middleware))
        .layer(CorsLayer::permissive())
}
