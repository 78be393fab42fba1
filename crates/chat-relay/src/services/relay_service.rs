use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::models::chat::{ConversationId, Turn};
use crate::services::conversation::ConversationStore;
use crate::services::llm_service::LlmProvider;
use crate::utils::error::RelayError;

/// Result of one successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReply {
    pub text: String,
    pub conversation_id: ConversationId,
}

/// Forwards user messages to the LLM and keeps per-conversation history.
///
/// An exchange is transactional: the user turn (and the system prompt on the
/// first exchange) is staged, and only committed together with the assistant
/// reply. A failed exchange leaves the store as it was.
pub struct RelayService {
    store: Arc<ConversationStore>,
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
}

impl RelayService {
    pub fn new(
        store: Arc<ConversationStore>,
        provider: Arc<dyn LlmProvider>,
        system_prompt: String,
    ) -> Self {
        Self {
            store,
            provider,
            system_prompt,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub async fn relay(
        &self,
        conversation_id: ConversationId,
        message: &str,
    ) -> Result<RelayReply, RelayError> {
        if message.is_empty() {
            return Err(RelayError::MissingMessage);
        }

        // Fail fast, before the store is touched
        if !self.provider.is_configured() {
            return Err(RelayError::MissingApiKey);
        }

        let start_time = Instant::now();
        let conversation = self.store.get_or_create(&conversation_id);
        let mut history = conversation.lock().await;

        let mut staged = vec![Turn::user(message)];
        if history.len() + staged.len() == 1 {
            debug!("First exchange on {}, injecting system prompt", conversation_id);
            staged.insert(0, Turn::system(self.system_prompt.as_str()));
        }

        let outbound: Vec<Turn> = history.turns().iter().chain(staged.iter()).cloned().collect();

        match self.provider.complete(&outbound).await {
            Ok(text) => {
                let is_new = history.is_empty();
                staged.push(Turn::assistant(text.as_str()));
                history.extend(staged);
                let history_len = history.len();
                drop(history);

                // A new conversation only takes a retention slot once it commits
                if is_new {
                    self.store.enforce_retention();
                }

                info!(
                    "Relayed message on {}: history_len={}, elapsed_ms={}",
                    conversation_id,
                    history_len,
                    start_time.elapsed().as_millis()
                );

                Ok(RelayReply {
                    text,
                    conversation_id,
                })
            }
            Err(e) => {
                drop(history);
                self.store.discard_if_unused(&conversation_id, conversation);

                warn!(
                    "Exchange on {} failed after {}ms with {}",
                    conversation_id,
                    start_time.elapsed().as_millis(),
                    e.code()
                );
                Err(e)
            }
        }
    }
}
