use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use chat_relay::config::settings::API_KEY_VAR;
use chat_relay::config::Settings;
use chat_relay::services::{ConversationStore, LlmService, RelayService};
use chat_relay::utils::telemetry::init_telemetry;
use chat_relay::{bind_listener, build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (.env, config/settings.*, APP__* variables)
    let settings = Settings::load().context("Failed to load configuration")?;

    // Initialize logging
    init_telemetry(!settings.is_development());

    info!("🚀 Starting chat relay (environment: {})", settings.environment);

    if !settings.has_api_key() {
        warn!("{} is not set, chat requests will fail with E1000", API_KEY_VAR);
    }

    // Initialize services
    let store = Arc::new(ConversationStore::new(settings.conversation.retention()));
    let llm_service = Arc::new(LlmService::new(settings.llm.clone())?);
    info!("✅ LLM endpoint: {}", llm_service.endpoint());

    let relay = Arc::new(RelayService::new(
        store,
        llm_service,
        settings.prompts.system_prompt.clone(),
    ));

    let host = settings.server.host.clone();
    let port = settings.server.port;

    let app = build_router(AppState::new(relay, settings));

    let listener = bind_listener(&host, port).await?;

    info!("🎯 Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
