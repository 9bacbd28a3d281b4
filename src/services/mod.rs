pub mod cache;
pub mod database;
pub mod reconcile;
pub mod rooms;
pub mod send;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod testing;

pub use cache::{spawn_cache_writer, ConversationCache};
pub use database::Database;
pub use rooms::{HydrateOutcome, RoomService};
pub use send::{SendCoordinator, SendOutcome, SendPhase, STREAM_ERROR_MARKER};
pub use session::{SessionService, SessionStatus};
pub use store::{ChatState, ChatStore, Route};
