use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fedbroker_node::FederationBroker;

#[derive(Clone)]
pub struct StatsAppState {
    pub broker: Arc<FederationBroker>,
}

pub fn build_router(state: StatsAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

/// `ok` once both legs report a connected server.
async fn health(State(state): State<StatsAppState>) -> impl IntoResponse {
    let connections = state.broker.connections();
    let connected = connections
        .kinds()
        .all(|kind| connections.connected_server(kind).is_some());
    if connected {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "disconnected")
    }
}

async fn stats(State(state): State<StatsAppState>) -> impl IntoResponse {
    Json(state.broker.stats())
}
