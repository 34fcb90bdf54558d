//! HTTP router and handlers

use std::sync::Arc;

use axum::{Extension, Json, Router, middleware, response::IntoResponse, routing::get};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::gate::{BearerGate, bearer_gate};
use crate::users::LocalUser;

/// Create the router
///
/// `/health` is public; everything under `/api` runs behind the gate.
pub fn create_router(gate: Arc<BearerGate>) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me_handler))
        .route_layer(middleware::from_fn_with_state(gate, bearer_gate));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// The authenticated local user
async fn me_handler(Extension(user): Extension<LocalUser>) -> Json<LocalUser> {
    Json(user)
}
