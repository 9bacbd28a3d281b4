pub mod conversation;
pub mod message;

pub use conversation::{
    is_placeholder_title, normalize_chat_rooms, title_from_input, truncate_title, Conversation,
    DEFAULT_TITLE, FIRST_TITLE, TITLE_MAX_CHARS,
};
pub use message::{map_messages, Message, Role};
