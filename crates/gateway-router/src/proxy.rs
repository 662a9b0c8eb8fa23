use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use gateway_core::GatewayState;

/// Wires the public HTTP surface: the chat completions endpoint plus a
/// liveness probe. Everything else (custom providers, admin, billing) is
/// reached through the same request body, not separate routes.
pub fn proxy_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(gateway_core::handler::chat_completions))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
