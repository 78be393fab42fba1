use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::models::chat::{ConversationId, Turn};

/// How many conversations the store keeps before evicting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep every conversation until the process exits
    Unbounded,
    /// Evict the least recently active idle conversation past this many
    MaxConversations(usize),
}

/// Ordered, append-only turns of one conversation
#[derive(Debug, Default)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }
}

/// One conversation thread. The async lock serializes exchanges on it.
#[derive(Debug)]
pub struct Conversation {
    history: AsyncMutex<History>,
    last_activity: Mutex<Instant>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            history: AsyncMutex::new(History::default()),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Waits for exclusive access to the history
    pub async fn lock(&self) -> MutexGuard<'_, History> {
        let guard = self.history.lock().await;
        self.touch();
        guard
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn is_idle_and_empty(&self) -> bool {
        self.history
            .try_lock()
            .map(|history| history.is_empty())
            .unwrap_or(false)
    }
}

/// Thread-safe in-memory conversation store.
/// Sharded by `DashMap`; each conversation carries its own lock.
#[derive(Debug)]
pub struct ConversationStore {
    conversations: DashMap<ConversationId, Arc<Conversation>>,
    retention: RetentionPolicy,
}

impl ConversationStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        match retention {
            RetentionPolicy::Unbounded => {
                warn!("Conversation store is unbounded, every conversation id is kept until exit")
            }
            RetentionPolicy::MaxConversations(max) => {
                info!("Conversation store keeps at most {} conversations", max)
            }
        }

        Self {
            conversations: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Shared handle to the conversation for `id`, created empty if unseen.
    /// Creating an entry never evicts; see [`ConversationStore::enforce_retention`].
    pub fn get_or_create(&self, id: &str) -> Arc<Conversation> {
        if let Some(existing) = self.conversations.get(id) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("Created conversation {}", id);
                Arc::new(Conversation::new())
            });
        Arc::clone(entry.value())
    }

    pub async fn append(&self, id: &str, turn: Turn) {
        let conversation = self.get_or_create(id);
        let mut history = conversation.lock().await;
        let was_empty = history.is_empty();
        history.push(turn);
        drop(history);

        if was_empty {
            self.enforce_retention();
        }
    }

    /// Copy of the current history, `None` for an unseen id
    pub async fn snapshot(&self, id: &str) -> Option<Vec<Turn>> {
        let conversation = self
            .conversations
            .get(id)
            .map(|entry| Arc::clone(entry.value()))?;
        let history = conversation.history.lock().await;
        Some(history.turns().to_vec())
    }

    /// Removes the conversation if it is still empty and nobody else holds it.
    /// Returns true when the entry was removed.
    pub fn discard_if_unused(&self, id: &str, conversation: Arc<Conversation>) -> bool {
        drop(conversation);

        let removed = self
            .conversations
            .remove_if(id, |_, conversation| {
                Arc::strong_count(conversation) == 1 && conversation.is_idle_and_empty()
            })
            .is_some();

        if removed {
            debug!("Discarded empty conversation {}", id);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Evicts least recently active idle conversations until the store is
    /// back within its bound. Runs once a new conversation commits history.
    pub fn enforce_retention(&self) {
        let RetentionPolicy::MaxConversations(max) = self.retention else {
            return;
        };

        while self.conversations.len() > max {
            // Conversations held by an in-flight request are never evicted
            let oldest = self
                .conversations
                .iter()
                .filter(|entry| Arc::strong_count(entry.value()) == 1)
                .min_by_key(|entry| entry.value().last_activity())
                .map(|entry| entry.key().clone());

            let Some(key) = oldest else {
                warn!(
                    "All {} conversations are busy, store temporarily exceeds its bound of {}",
                    self.conversations.len(),
                    max
                );
                return;
            };

            if self
                .conversations
                .remove_if(&key, |_, conversation| Arc::strong_count(conversation) == 1)
                .is_some()
            {
                info!("Evicted least recently active conversation {}", key);
            }
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::Unbounded)
    }
}
