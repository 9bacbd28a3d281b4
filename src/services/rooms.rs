use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use super::reconcile::{merge_messages, reconcile, recover_after_failure};
use super::store::{ChatStore, Route};
use crate::api::{ApiError, ChatApi};
use crate::models::{map_messages, normalize_chat_rooms, Conversation, DEFAULT_TITLE};

/// Tracks which conversations are being hydrated and lets navigation
/// invalidate results that have not landed yet.
///
/// In-flight entries are tagged with the generation they started in, so a
/// fetch left over from before a cancel neither blocks nor clears a newer one.
#[derive(Debug, Default)]
pub struct HydrationTracker {
    in_flight: Mutex<HashMap<String, u64>>,
    generation: Mutex<Generation>,
}

#[derive(Debug, Default)]
struct Generation {
    seq: u64,
    token: CancellationToken,
}

/// Held for the lifetime of one fetch. Dropping it clears the in-flight
/// entry, whether the fetch finished or failed.
#[must_use]
pub struct HydrationTicket<'a> {
    tracker: &'a HydrationTracker,
    id: String,
    seq: u64,
    token: CancellationToken,
}

impl HydrationTicket<'_> {
    pub fn is_stale(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for HydrationTicket<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .tracker
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&self.id) == Some(&self.seq) {
            in_flight.remove(&self.id);
        }
    }
}

impl HydrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a fetch for `id` is already running in this generation.
    pub fn try_begin(&self, id: &str) -> Option<HydrationTicket<'_>> {
        let generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(id) == Some(&generation.seq) {
            return None;
        }
        in_flight.insert(id.to_string(), generation.seq);
        Some(HydrationTicket {
            tracker: self,
            id: id.to_string(),
            seq: generation.seq,
            token: generation.token.clone(),
        })
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        let seq = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seq;
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            == Some(&seq)
    }

    /// Mark every outstanding fetch stale and forget it. Later fetches start
    /// a new generation.
    pub fn cancel_pending(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        generation.token.cancel();
        generation.token = CancellationToken::new();
        generation.seq += 1;
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrateOutcome {
    Applied,
    /// Another fetch for the same conversation was already running.
    Suppressed,
    /// The result arrived after navigation moved on and was dropped.
    Discarded,
}

/// Room-list, selection and housekeeping intents from the sidebar.
pub struct RoomService {
    api: Arc<dyn ChatApi>,
    store: ChatStore,
    hydration: HydrationTracker,
}

impl RoomService {
    pub fn new(api: Arc<dyn ChatApi>, store: ChatStore) -> Self {
        Self {
            api,
            store,
            hydration: HydrationTracker::new(),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// Fetch the room list and fold it into the local conversations.
    ///
    /// On failure the local state is kept (or seeded with one fresh
    /// conversation if empty) and the error is returned for display.
    pub async fn load_chat_rooms(&self) -> Result<(), ApiError> {
        match self.api.list_rooms().await {
            Ok(rooms) => {
                let server = normalize_chat_rooms(rooms);
                let count = server.len();
                self.store.update(|state| {
                    let requested = state.route.chat_id().map(str::to_string);
                    let (merged, active) = reconcile(
                        server,
                        &state.conversations,
                        requested.as_deref(),
                        state.active_id.as_deref(),
                    );
                    state.conversations = merged;
                    if active.is_some() {
                        state.active_id = active;
                    }
                });
                tracing::debug!("Loaded {} chat rooms", count);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to load chat rooms, keeping local state: {}", e);
                self.store.update(|state| {
                    state.conversations = recover_after_failure(&state.conversations);
                    let active_present = state
                        .active_id
                        .as_deref()
                        .is_some_and(|id| state.contains(id));
                    if !active_present {
                        state.active_id = state.conversations.first().map(|c| c.id.clone());
                    }
                });
                Err(e)
            }
        }
    }

    /// Fetch the messages of one conversation and merge them into the store.
    pub async fn hydrate(&self, id: &str) -> Result<HydrateOutcome, ApiError> {
        let Some(ticket) = self.hydration.try_begin(id) else {
            tracing::debug!("Hydration for {} already in flight", id);
            return Ok(HydrateOutcome::Suppressed);
        };

        let payload = match self.api.fetch_messages(id).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to load messages for {}: {}", id, e);
                return Err(e);
            }
        };

        if ticket.is_stale() {
            tracing::debug!("Dropping stale messages for {}", id);
            return Ok(HydrateOutcome::Discarded);
        }

        let server_messages = map_messages(payload.messages);
        let title = payload.title;
        self.store.update(|state| match state.conversation_mut(id) {
            Some(conv) => {
                let local = std::mem::take(&mut conv.messages);
                conv.messages = merge_messages(local, server_messages);
                if let Some(title) = title {
                    conv.title = title;
                }
            }
            None => {
                let mut conv = Conversation::new(title.unwrap_or_else(|| DEFAULT_TITLE.to_string()));
                conv.id = id.to_string();
                conv.messages = server_messages;
                state.conversations.push(conv);
            }
        });

        drop(ticket);
        Ok(HydrateOutcome::Applied)
    }

    /// Open a conversation: hydrate it, then make it active.
    pub async fn select_chat(&self, id: &str) -> Result<HydrateOutcome, ApiError> {
        if !self.hydration.is_in_flight(id) {
            self.hydration.cancel_pending();
        }

        let outcome = self.hydrate(id).await?;
        if outcome == HydrateOutcome::Applied {
            self.store.update(|state| {
                state.active_id = Some(id.to_string());
                state.route = Route::Chat(id.to_string());
            });
        }
        Ok(outcome)
    }

    /// Leave the current conversation for the landing view. The next send
    /// starts a new conversation.
    pub fn new_chat(&self) {
        self.navigate_away();
        self.store.update(|state| state.route = Route::Landing);
    }

    /// Drop any hydration result that has not been applied yet.
    pub fn navigate_away(&self) {
        self.hydration.cancel_pending();
    }

    pub fn rename(&self, id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        self.store.update(|state| state.rename(id, title))
    }

    pub fn delete_chat(&self, id: &str) -> bool {
        if self.hydration.is_in_flight(id) {
            self.hydration.cancel_pending();
        }
        let removed = self.store.update(|state| state.remove_conversation(id));
        if removed {
            tracing::debug!("Deleted conversation {}", id);
        }
        removed
    }
}
