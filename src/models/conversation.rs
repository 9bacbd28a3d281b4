use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;
use crate::api::types::RoomSummary;

/// Title given to conversations that have not been named yet.
pub const DEFAULT_TITLE: &str = "New chat";

/// Title of the conversation synthesized when the offline cache is empty.
pub const FIRST_TITLE: &str = "First conversation";

const LEGACY_DEFAULT_TITLE: &str = "새 대화";

pub const TITLE_MAX_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub is_temp: bool,
    #[serde(default)]
    pub is_favorited: bool,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), title)
    }

    /// Optimistic record shown while the backend has not assigned an id yet.
    pub fn temporary(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            is_temp: true,
            ..Self::with_id(id, title)
        }
    }

    /// Stand-in conversation the client synthesizes when there is nothing
    /// else to show. It becomes a real room on the first send.
    pub fn placeholder(title: impl Into<String>) -> Self {
        Self::temporary(Uuid::new_v4().to_string(), title)
    }

    fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
            is_temp: false,
            is_favorited: false,
        }
    }

    pub fn has_placeholder_title(&self) -> bool {
        is_placeholder_title(&self.title)
    }
}

pub fn is_placeholder_title(title: &str) -> bool {
    title == DEFAULT_TITLE || title == LEGACY_DEFAULT_TITLE
}

/// Turn a room-list payload into conversations without messages.
pub fn normalize_chat_rooms(rooms: Vec<RoomSummary>) -> Vec<Conversation> {
    rooms
        .into_iter()
        .map(|room| Conversation {
            is_favorited: room.is_favorited.unwrap_or(false),
            ..Conversation::with_id(
                room.chat_room_id.into_string(),
                room.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            )
        })
        .collect()
}

/// First `max_chars` characters of `text`.
pub fn truncate_title(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Title for a conversation started from `input`, falling back to the default.
pub fn title_from_input(input: &str) -> String {
    let title = truncate_title(input.trim(), TITLE_MAX_CHARS);
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_applies_defaults() {
        let rooms: Vec<RoomSummary> = serde_json::from_value(json!([
            {"chatRoomId": 12, "title": "Trip plans", "isFavorited": true},
            {"chatRoomId": "abc"}
        ]))
        .unwrap();

        let conversations = normalize_chat_rooms(rooms);
        assert_eq!(conversations[0].id, "12");
        assert_eq!(conversations[0].title, "Trip plans");
        assert!(conversations[0].is_favorited);
        assert_eq!(conversations[1].id, "abc");
        assert_eq!(conversations[1].title, DEFAULT_TITLE);
        assert!(!conversations[1].is_favorited);
        assert!(conversations.iter().all(|c| c.messages.is_empty() && !c.is_temp));
    }

    #[test]
    fn test_truncate_title_respects_char_boundaries() {
        assert_eq!(truncate_title("short", 20), "short");
        assert_eq!(
            truncate_title("abcdefghijklmnopqrstuvwxyz", 20),
            "abcdefghijklmnopqrst"
        );
        let korean = "가나다라마바사아자차카타파하가나다라마바사";
        assert_eq!(truncate_title(korean, 20).chars().count(), 20);
    }

    #[test]
    fn test_title_from_blank_input_uses_default() {
        assert_eq!(title_from_input("   "), DEFAULT_TITLE);
        assert_eq!(title_from_input("  hello  "), "hello");
    }

    #[test]
    fn test_placeholder_titles() {
        assert!(Conversation::new(DEFAULT_TITLE).has_placeholder_title());
        let synthesized = Conversation::placeholder(DEFAULT_TITLE);
        assert!(synthesized.is_temp);
        assert!(synthesized.has_placeholder_title());
        assert!(is_placeholder_title("새 대화"));
        assert!(!is_placeholder_title("Trip plans"));
    }

    #[test]
    fn test_cached_record_without_optional_fields() {
        let conv: Conversation = serde_json::from_value(json!({
            "id": "1",
            "title": "Old",
            "created_at": "2024-05-01T09:30:00Z"
        }))
        .unwrap();
        assert!(conv.messages.is_empty());
        assert!(!conv.is_temp);
        assert!(!conv.is_favorited);
    }
}
