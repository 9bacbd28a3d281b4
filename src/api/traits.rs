use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::stream::TextChunks;
use super::types::{ApiError, CreatedRoom, RoomMessages, RoomSummary};

/// The chat-room backend as seen by the client.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError>;

    async fn create_room(&self, question: &str) -> Result<CreatedRoom, ApiError>;

    async fn fetch_messages(&self, room_id: &str) -> Result<RoomMessages, ApiError>;

    /// Fails with [`ApiError::StreamOpen`] before yielding anything when the
    /// backend refuses the request.
    async fn open_chat_stream(
        &self,
        room_id: &str,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<TextChunks, ApiError>;

    async fn probe_session(&self) -> bool;

    async fn logout(&self) -> Result<(), ApiError>;
}
