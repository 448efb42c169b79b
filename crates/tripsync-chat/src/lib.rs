//! Per-trip chat session: the visible message list for one client, kept in
//! step with the store and with peers' broadcasts.

pub mod optimistic;
pub mod session;
pub mod state;
pub mod store;
pub mod typing;

pub use session::{ChatSession, SessionOptions};
pub use state::MessageList;
pub use store::ChatStore;
pub use typing::TypingDebouncer;
