//! Conversation-state core for a streaming chat-room client.
//!
//! [`services`] owns the state machines (room list, hydration, sending);
//! [`api`] talks to the backend and turns streamed bodies into text.

pub mod api;
pub mod config;
pub mod models;
pub mod services;
