/// Conversation state and its repositories

pub mod state;
pub mod store;

pub use state::{ConversationState, Direction, HistoryRecord, Position};
pub use store::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
