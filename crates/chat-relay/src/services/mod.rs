pub mod conversation;
pub mod llm_service;
pub mod relay_service;

pub use conversation::ConversationStore;
pub use llm_service::{LlmProvider, LlmService};
pub use relay_service::{RelayReply, RelayService};
