use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::stream::TextChunks;
use super::traits::ChatApi;
use super::types::{ApiError, CreatedRoom, ErrorBody, QuestionBody, RoomMessages, RoomSummary};
use crate::config::Config;

/// `ChatApi` over HTTP. Every request shares one cookie jar so the session
/// cookie set at login travels with it.
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let jar = Arc::new(Jar::default());
        if let Some(cookie) = &config.session_cookie {
            jar.add_cookie_str(cookie, &config.base_url);
        }

        let client = Client::builder()
            .cookie_provider(jar)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            if let Some(message) = parsed.message.or(parsed.error) {
                return message;
            }
        }
        format!("{} request failed", status.as_u16())
    }

    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: Self::parse_error_message(status, &body),
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        let response = self
            .client
            .get(self.url("/api/chatRooms"))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn create_room(&self, question: &str) -> Result<CreatedRoom, ApiError> {
        let response = self
            .client
            .post(self.url("/api/chatRooms"))
            .json(&QuestionBody { question })
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn fetch_messages(&self, room_id: &str) -> Result<RoomMessages, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/chatRooms/{}/messages", room_id)))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn open_chat_stream(
        &self,
        room_id: &str,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<TextChunks, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/api/chatRooms/{}/chat", room_id)))
            .json(&QuestionBody { question })
            .send()
            .await
            .map_err(|e| ApiError::StreamOpen(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::StreamOpen(format!(
                "HTTP {}: {}",
                status.as_u16(),
                Self::parse_error_message(status, &body)
            )));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::Stream(e.to_string())))
            .boxed();

        Ok(TextChunks::new(body, cancel))
    }

    async fn probe_session(&self) -> bool {
        match self.client.get(self.url("/api/chatRooms")).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::warn!("Session probe failed: {}", e);
                false
            }
        }
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/logout"))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::ensure_success(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api_for(server: &MockServer) -> HttpChatApi {
        let config = Config::for_base_url(&server.uri()).unwrap();
        HttpChatApi::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_list_rooms() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chatRooms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"chatRoomId": 1, "title": "First", "isFavorited": true},
                {"chatRoomId": 2}
            ])))
            .mount(&server)
            .await;

        let rooms = api_for(&server).await.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].title.as_deref(), Some("First"));
        assert_eq!(rooms[1].is_favorited, None);
    }

    #[tokio::test]
    async fn test_list_rooms_non_success_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chatRooms"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"message": "db down"})),
            )
            .mount(&server)
            .await;

        let err = api_for(&server).await.list_rooms().await.unwrap_err();
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "db down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_room_sends_question() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chatRooms"))
            .and(body_json(json!({"question": "What is Rust?"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"chatRoomId": 42, "query": "What is Rust?"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let created = api_for(&server)
            .await
            .create_room("What is Rust?")
            .await
            .unwrap();
        assert_eq!(created.chat_room_id.into_string(), "42");
        assert_eq!(created.query.as_deref(), Some("What is Rust?"));
    }

    #[tokio::test]
    async fn test_fetch_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chatRooms/9/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chatRoomId": 9,
                "title": "Nine",
                "messages": [
                    {"messageId": 1, "isUser": true, "message": "q", "created_time": "2024-05-01T09:30:00"},
                    {"messageId": 2, "isUser": false, "message": "a", "created_time": "2024-05-01T09:30:01"}
                ]
            })))
            .mount(&server)
            .await;

        let payload = api_for(&server).await.fetch_messages("9").await.unwrap();
        assert_eq!(payload.title.as_deref(), Some("Nine"));
        assert_eq!(payload.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_chat_stream_body_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chatRooms/3/chat"))
            .and(body_json(json!({"question": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello 세계"))
            .mount(&server)
            .await;

        let chunks = api_for(&server)
            .await
            .open_chat_stream("3", "hi", CancellationToken::new())
            .await
            .unwrap();
        let text: String = chunks.map(|c| c.unwrap()).collect::<Vec<_>>().await.concat();
        assert_eq!(text, "Hello 세계");
    }

    #[tokio::test]
    async fn test_chat_stream_refused_fails_before_any_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chatRooms/3/chat"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let result = api_for(&server)
            .await
            .open_chat_stream("3", "hi", CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ApiError::StreamOpen(_))));
    }

    #[tokio::test]
    async fn test_probe_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chatRooms"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!api_for(&server).await.probe_session().await);
    }

    #[tokio::test]
    async fn test_session_cookie_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chatRooms"))
            .and(header("cookie", "JSESSIONID=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Config::for_base_url(&server.uri()).unwrap();
        config.session_cookie = Some("JSESSIONID=abc123".into());
        let api = HttpChatApi::new(&config).unwrap();
        assert!(api.probe_session().await);
    }

    #[tokio::test]
    async fn test_logout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server).await.logout().await.unwrap();
    }
}
