use axum::{extract::rejection::JsonRejection, extract::State, Json};
use std::sync::Arc;
use tracing::info;

use crate::models::chat::{ChatRequest, ChatResponse};
use crate::services::RelayService;
use crate::utils::error::RelayError;

pub async fn chat_handler(
    State(relay): State<Arc<RelayService>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, RelayError> {
    let Json(request) = payload?;

    let conversation_id = request.conversation_id();
    let message = request.message.unwrap_or_default();
    if message.is_empty() {
        return Err(RelayError::MissingMessage);
    }

    info!(
        "Chat request: conversation={}, message_len={}",
        conversation_id,
        message.len()
    );

    let reply = relay.relay(conversation_id, &message).await?;

    Ok(Json(ChatResponse {
        response: reply.text,
        conversation_id: reply.conversation_id,
    }))
}
