//! Conversation memory management module
//!
//! Provides in-memory conversation state with:
//! - Sharded concurrent map (DashMap) keyed by conversation id
//! - Per-conversation async lock so exchanges on one id never interleave
//! - Explicit retention policy (unbounded by default)

mod store;

pub use store::{Conversation, ConversationStore, History, RetentionPolicy};

pub use crate::models::chat::{ConversationId, Turn};
