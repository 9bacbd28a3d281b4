use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use super::database::Database;
use super::store::ChatStore;
use crate::models::Conversation;

const CONVERSATIONS_KEY: &str = "chatui.conversations.v1";

/// Offline copy of the conversation list. Only read at startup; once the
/// backend answers, its data takes over.
#[derive(Debug, Clone)]
pub struct ConversationCache {
    db: Database,
}

impl ConversationCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Cached conversations, or an empty list when nothing usable is stored.
    pub async fn load(&self) -> Vec<Conversation> {
        match self.db.get_record(CONVERSATIONS_KEY).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(conversations) => conversations,
                Err(e) => {
                    tracing::warn!("Discarding unreadable conversation cache: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!("Failed to read conversation cache: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn save(&self, conversations: &[Conversation]) -> Result<()> {
        let json =
            serde_json::to_string(conversations).context("Failed to serialize conversations")?;
        self.db.set_record(CONVERSATIONS_KEY, &json).await
    }

    /// Forget the cached conversations, e.g. after logging out.
    pub async fn clear(&self) -> Result<()> {
        self.db.delete_record(CONVERSATIONS_KEY).await
    }
}

/// Persist the conversation list after every store update until the store
/// is dropped.
pub fn spawn_cache_writer(store: &ChatStore, cache: ConversationCache) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let conversations = rx.borrow_and_update().conversations.clone();
            if let Err(e) = cache.save(&conversations).await {
                tracing::error!("Failed to write conversation cache: {}", e);
            }
        }
        tracing::debug!("Conversation cache writer stopped");
    })
}
