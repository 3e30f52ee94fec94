//! Web router using Axum

use axum::extract::State;
use axum::{Json, Router, routing::get};
use costsync_core::ServiceStatus;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::live;
use crate::sse;
use crate::state::AppState;

/// Create the web router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(live::ws_handler))
        .route("/api/health", get(health_handler))
        .route("/api/events", get(sse_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Dependency connectivity and registry size; no side effects
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(state.service.status(state.registry.len()))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> axum::response::sse::Sse<
    impl futures::stream::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
> {
    sse::create_sse_stream(state.service.events().clone())
}
