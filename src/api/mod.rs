pub mod client;
pub mod stream;
pub mod traits;
pub mod types;

pub use client::HttpChatApi;
pub use stream::{TextChunks, Utf8ChunkDecoder};
pub use traits::ChatApi;
pub use types::ApiError;
