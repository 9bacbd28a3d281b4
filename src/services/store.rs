use std::sync::Arc;

use tokio::sync::watch;

use crate::models::{Conversation, Message, DEFAULT_TITLE, FIRST_TITLE};

/// Which view the client is showing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Route {
    /// The "new conversation" landing view.
    #[default]
    Landing,
    Chat(String),
}

impl Route {
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Route::Landing => None,
            Route::Chat(id) => Some(id),
        }
    }
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub conversations: Vec<Conversation>,
    pub active_id: Option<String>,
    pub route: Route,
    /// Composer contents.
    pub draft: String,
}

impl ChatState {
    /// Initial state restored from the offline cache. An empty cache still
    /// yields one conversation so there is always an active target.
    pub fn from_cache(mut conversations: Vec<Conversation>) -> Self {
        if conversations.is_empty() {
            conversations.push(Conversation::placeholder(FIRST_TITLE));
        }
        let active_id = conversations.first().map(|c| c.id.clone());
        Self {
            conversations,
            active_id,
            route: Route::Landing,
            draft: String::new(),
        }
    }

    /// The active conversation, falling back to the first one.
    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id
            .as_deref()
            .and_then(|id| self.conversation(id))
            .or_else(|| self.conversations.first())
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversation(id).is_some()
    }

    /// Replace the conversation with the same id, or append it.
    pub fn upsert_conversation(&mut self, next: Conversation) {
        match self.conversation_mut(&next.id) {
            Some(existing) => *existing = next,
            None => self.conversations.push(next),
        }
    }

    pub fn push_message(&mut self, conversation_id: &str, message: Message) -> bool {
        match self.conversation_mut(conversation_id) {
            Some(conv) => {
                conv.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// Append a streamed piece to an existing message.
    pub fn append_to_message(&mut self, conversation_id: &str, message_id: &str, chunk: &str) -> bool {
        let Some(message) = self
            .conversation_mut(conversation_id)
            .and_then(|conv| conv.messages.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        message.content.push_str(chunk);
        true
    }

    pub fn rename(&mut self, conversation_id: &str, title: &str) -> bool {
        match self.conversation_mut(conversation_id) {
            Some(conv) => {
                conv.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Rewrite a temporary conversation in place once the backend has
    /// assigned its id. Any entry already listed under the persisted id is
    /// dropped so the id stays unique.
    pub fn promote_temp(&mut self, temp_id: &str, persisted_id: &str, title: Option<&str>) -> bool {
        if !self.contains(temp_id) {
            return false;
        }
        if temp_id != persisted_id {
            self.conversations.retain(|c| c.id != persisted_id);
        }
        let Some(conv) = self.conversation_mut(temp_id) else {
            return false;
        };
        conv.id = persisted_id.to_string();
        conv.is_temp = false;
        if let Some(title) = title {
            conv.title = title.to_string();
        }

        if self.active_id.as_deref() == Some(temp_id) {
            self.active_id = Some(persisted_id.to_string());
        }
        if self.route.chat_id() == Some(temp_id) {
            self.route = Route::Chat(persisted_id.to_string());
        }
        true
    }

    /// Remove a conversation. Deleting the last one leaves a fresh
    /// placeholder behind, which becomes active.
    pub fn remove_conversation(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return false;
        }

        if self.conversations.is_empty() {
            self.conversations.push(Conversation::placeholder(DEFAULT_TITLE));
        }

        let active_survives = self
            .active_id
            .as_deref()
            .is_some_and(|active| self.contains(active));
        if !active_survives {
            self.active_id = self.conversations.first().map(|c| c.id.clone());
        }
        if self.route.chat_id() == Some(id) {
            self.route = match &self.active_id {
                Some(active) => Route::Chat(active.clone()),
                None => Route::Landing,
            };
        }
        true
    }

    /// Conversations whose title contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.trim().to_lowercase();
        self.conversations
            .iter()
            .filter(|c| needle.is_empty() || c.title.to_lowercase().contains(&needle))
            .collect()
    }
}

/// Process-wide holder of the current [`ChatState`].
///
/// Every mutation runs against the latest snapshot under the channel's write
/// lock, so concurrent tasks never apply an update to a stale copy.
/// Subscribers are woken after each update.
#[derive(Debug, Clone)]
pub struct ChatStore {
    tx: Arc<watch::Sender<ChatState>>,
}

impl ChatStore {
    pub fn new(initial: ChatState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ChatState {
        self.tx.borrow().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut result = None;
        self.tx.send_modify(|state| result = Some(f(state)));
        match result {
            Some(result) => result,
            None => unreachable!("send_modify always runs the closure"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }

    pub fn set_draft(&self, text: &str) {
        self.update(|state| state.draft = text.to_string());
    }
}
