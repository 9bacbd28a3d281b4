//! Scripted `ChatApi` used by the service tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::api::stream::chunks_from_bytes;
use crate::api::types::{CreatedRoom, RemoteId, RoomMessages, RoomSummary, WireMessage};
use crate::api::{ApiError, ChatApi, TextChunks};

#[derive(Default)]
pub struct FakeApi {
    /// `None` makes the room list fail with a transport error.
    pub rooms: Mutex<Option<Vec<RoomSummary>>>,
    /// `None` makes room creation fail with HTTP 500.
    pub created: Mutex<Option<CreatedRoom>>,
    pub messages: Mutex<HashMap<String, RoomMessages>>,
    /// `None` makes the chat endpoint refuse to open a stream.
    pub stream: Mutex<Option<Vec<Result<&'static str, &'static str>>>>,
    /// When set, create/fetch/chat calls wait for a notification first.
    pub gate: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn with_rooms(self, rooms: &[(&str, &str)]) -> Self {
        *self.rooms.lock().unwrap() = Some(rooms.iter().map(|(id, title)| room(id, title)).collect());
        self
    }

    pub fn with_created(self, id: &str, query: Option<&str>) -> Self {
        *self.created.lock().unwrap() = Some(CreatedRoom {
            chat_room_id: RemoteId::Text(id.to_string()),
            query: query.map(str::to_string),
        });
        self
    }

    pub fn with_stream(self, chunks: Vec<Result<&'static str, &'static str>>) -> Self {
        *self.stream.lock().unwrap() = Some(chunks);
        self
    }

    pub fn with_messages(self, room_id: &str, texts: &[(&str, bool)]) -> Self {
        let messages = texts
            .iter()
            .enumerate()
            .map(|(i, (text, is_user))| WireMessage {
                message_id: RemoteId::Number(i as i64 + 1),
                is_user: *is_user,
                message: Some(text.to_string()),
                created_time: None,
                user_id: None,
            })
            .collect();
        self.messages.lock().unwrap().insert(
            room_id.to_string(),
            RoomMessages {
                chat_room_id: RemoteId::Text(room_id.to_string()),
                title: Some(format!("Room {}", room_id)),
                messages,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }
}

pub fn room(id: &str, title: &str) -> RoomSummary {
    RoomSummary {
        chat_room_id: RemoteId::Text(id.to_string()),
        title: Some(title.to_string()),
        is_favorited: None,
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        self.record("list_rooms".into());
        self.rooms
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::Transport("connection refused".into()))
    }

    async fn create_room(&self, question: &str) -> Result<CreatedRoom, ApiError> {
        self.record(format!("create_room:{}", question));
        self.wait_gate().await;
        self.created.lock().unwrap().clone().ok_or(ApiError::Status {
            status: 500,
            message: "create failed".into(),
        })
    }

    async fn fetch_messages(&self, room_id: &str) -> Result<RoomMessages, ApiError> {
        self.record(format!("fetch_messages:{}", room_id));
        self.wait_gate().await;
        self.messages
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: "no such room".into(),
            })
    }

    async fn open_chat_stream(
        &self,
        room_id: &str,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<TextChunks, ApiError> {
        self.record(format!("chat:{}:{}", room_id, question));
        self.wait_gate().await;
        let script = self
            .stream
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::StreamOpen("HTTP 502".into()))?;
        let chunks: Vec<Result<Bytes, ApiError>> = script
            .into_iter()
            .map(|c| match c {
                Ok(text) => Ok(Bytes::from_static(text.as_bytes())),
                Err(e) => Err(ApiError::Stream(e.to_string())),
            })
            .collect();
        Ok(chunks_from_bytes(chunks, cancel))
    }

    async fn probe_session(&self) -> bool {
        self.record("probe_session".into());
        self.rooms.lock().unwrap().is_some()
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.record("logout".into());
        Ok(())
    }
}
