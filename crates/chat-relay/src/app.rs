use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use anyhow::Context;
use std::any::Any;
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    services::ServeFile,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;
use crate::utils::error::RelayError;

pub fn build_router(state: AppState) -> Router {
    let index_path = state.settings.server.index_path.clone();
    let body_limit = state.settings.server.body_limit_bytes;

    Router::new()
        // Static chat page
        .route_service("/", ServeFile::new(index_path))
        .route("/api/health", get(handlers::health::health_check))
        .route("/api/chat", post(handlers::chat::chat_handler))
        .with_state(state)
        // Last-resort catch for anything a handler did not classify
        .layer(CatchPanicLayer::custom(handle_panic))
        // CORS (answers OPTIONS preflight on every route)
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Binds the server socket. `host` may be an IP literal or a hostname.
pub async fn bind_listener(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    RelayError::Internal(format!("Handler panicked: {}", detail)).into_response()
}
