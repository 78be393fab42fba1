use serde::{Deserialize, Serialize};

/// Client-chosen key partitioning history into independent threads
pub type ConversationId = String;

pub const DEFAULT_CONVERSATION_ID: &str = "default";

// ===== CONVERSATION MODELS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation, tagged with its speaker role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

impl ChatRequest {
    /// Falls back to the shared `"default"` conversation when the client sends none
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CONVERSATION_ID.to_string())
    }
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub environment: String,
    pub has_api_key: bool,
    pub server_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
