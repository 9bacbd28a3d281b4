use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::{ChatStore, Route};
use crate::api::ChatApi;
use crate::models::{title_from_input, Conversation, Message, Role};

/// Appended to the assistant message when a reply could not be produced.
pub const STREAM_ERROR_MARKER: &str = "\n(error) Could not load the answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPhase {
    #[default]
    Idle,
    EnsuringConversation,
    AwaitingFirstChunk,
    Streaming,
    Done,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing but whitespace was submitted.
    Empty,
    /// Another send was still in flight; nothing changed.
    Busy,
    Completed {
        conversation_id: String,
        message_id: String,
    },
    Failed {
        conversation_id: String,
        message_id: String,
        error: String,
    },
}

/// Where the user's message and the assistant placeholder went.
struct Placement {
    conversation_id: String,
    message_id: String,
    /// Set while the conversation still has to be created on the backend.
    pending_id: Option<String>,
}

/// Runs one user message through the conversation, creation and streaming
/// steps. Only one send runs at a time.
pub struct SendCoordinator {
    api: Arc<dyn ChatApi>,
    store: ChatStore,
    in_flight: tokio::sync::Mutex<()>,
    phase: watch::Sender<SendPhase>,
    stream_cancel: Mutex<Option<CancellationToken>>,
}

impl SendCoordinator {
    pub fn new(api: Arc<dyn ChatApi>, store: ChatStore) -> Self {
        let (phase, _rx) = watch::channel(SendPhase::Idle);
        Self {
            api,
            store,
            in_flight: tokio::sync::Mutex::new(()),
            phase,
            stream_cancel: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> SendPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SendPhase> {
        self.phase.subscribe()
    }

    /// True until the first piece of the reply has arrived.
    pub fn is_thinking(&self) -> bool {
        matches!(
            self.phase(),
            SendPhase::EnsuringConversation | SendPhase::AwaitingFirstChunk
        )
    }

    /// Stop the reply being streamed. Whatever arrived so far is kept.
    pub fn stop(&self) -> bool {
        match self
            .stream_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn send_draft(&self) -> SendOutcome {
        let draft = self.store.read(|state| state.draft.clone());
        self.send(&draft).await
    }

    pub async fn send(&self, input: &str) -> SendOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Ignoring send while another is in flight");
            return SendOutcome::Busy;
        };

        let question = input.trim();
        if question.is_empty() {
            return SendOutcome::Empty;
        }

        let cancel = CancellationToken::new();
        self.set_stream_cancel(Some(cancel.clone()));
        let outcome = self.run(question, cancel).await;
        self.set_stream_cancel(None);
        outcome
    }

    async fn run(&self, question: &str, cancel: CancellationToken) -> SendOutcome {
        self.set_phase(SendPhase::EnsuringConversation);

        let placement = self.store.update(|state| {
            let active = state
                .active_id
                .as_deref()
                .and_then(|id| state.conversation(id))
                .map(|c| (c.id.clone(), c.is_temp, c.has_placeholder_title()));

            let (conversation_id, pending_id, rename) = match active {
                Some((id, is_temp, placeholder)) if state.route != Route::Landing => {
                    // Synthesized placeholders and temps left over from a
                    // failed creation are created on the backend in place
                    let pending = is_temp.then(|| id.clone());
                    (id, pending, placeholder)
                }
                _ => {
                    let temp_id = Uuid::new_v4().to_string();
                    state.upsert_conversation(Conversation::temporary(
                        temp_id.clone(),
                        title_from_input(question),
                    ));
                    state.active_id = Some(temp_id.clone());
                    state.route = Route::Chat(temp_id.clone());
                    (temp_id.clone(), Some(temp_id), false)
                }
            };

            state.draft.clear();
            state.push_message(&conversation_id, Message::new(Role::User, question));
            let placeholder = Message::new(Role::Assistant, "");
            let message_id = placeholder.id.clone();
            state.push_message(&conversation_id, placeholder);

            if rename {
                state.rename(&conversation_id, &title_from_input(question));
            }

            Placement {
                conversation_id,
                message_id,
                pending_id,
            }
        });

        let creation = placement.pending_id.as_ref().map(|_| {
            let api = self.api.clone();
            let question = question.to_string();
            tokio::spawn(async move { api.create_room(&question).await })
        });

        let conversation_id = match (creation, &placement.pending_id) {
            (Some(handle), Some(temp_id)) => {
                let created = match handle.await {
                    Ok(Ok(created)) => created,
                    Ok(Err(e)) => return self.fail(&placement.conversation_id, &placement.message_id, e.to_string()),
                    Err(e) => return self.fail(&placement.conversation_id, &placement.message_id, e.to_string()),
                };
                let persisted_id = created.chat_room_id.into_string();
                let promoted = self.store.update(|state| {
                    state.promote_temp(temp_id, &persisted_id, created.query.as_deref())
                });
                if !promoted {
                    tracing::warn!("Conversation {} was removed before it was saved", temp_id);
                    self.set_phase(SendPhase::Errored);
                    return SendOutcome::Failed {
                        conversation_id: persisted_id,
                        message_id: placement.message_id,
                        error: "conversation removed before it was saved".to_string(),
                    };
                }
                tracing::debug!("Conversation {} saved as {}", temp_id, persisted_id);
                persisted_id
            }
            _ => placement.conversation_id.clone(),
        };
        let message_id = placement.message_id;

        self.set_phase(SendPhase::AwaitingFirstChunk);

        let mut chunks = match self
            .api
            .open_chat_stream(&conversation_id, question, cancel.clone())
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => return self.fail(&conversation_id, &message_id, e.to_string()),
        };

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = chunks.next() => next,
            };
            match next {
                Some(Ok(piece)) => {
                    if self.phase() != SendPhase::Streaming {
                        self.set_phase(SendPhase::Streaming);
                    }
                    self.store
                        .update(|state| state.append_to_message(&conversation_id, &message_id, &piece));
                }
                Some(Err(e)) => return self.fail(&conversation_id, &message_id, e.to_string()),
                None => break,
            }
        }

        if cancel.is_cancelled() {
            tracing::debug!("Reply in {} stopped by user", conversation_id);
        }
        self.set_phase(SendPhase::Done);
        SendOutcome::Completed {
            conversation_id,
            message_id,
        }
    }

    fn fail(&self, conversation_id: &str, message_id: &str, error: String) -> SendOutcome {
        tracing::error!("Send to {} failed: {}", conversation_id, error);
        self.store
            .update(|state| state.append_to_message(conversation_id, message_id, STREAM_ERROR_MARKER));
        self.set_phase(SendPhase::Errored);
        SendOutcome::Failed {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            error,
        }
    }

    fn set_phase(&self, phase: SendPhase) {
        self.phase.send_replace(phase);
    }

    fn set_stream_cancel(&self, token: Option<CancellationToken>) {
        *self
            .stream_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }
}
