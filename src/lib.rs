/// Convoflow: conversational flow execution engine for WhatsApp chatbots
///
/// Stored flow documents (webhook, GPT, router, message, commerce, payment,
/// HTTP and cart nodes joined by conditional edges) are compiled into a
/// checked graph and walked once per inbound message, with conversation state
/// persisted between messages.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Flow documents, compiled graphs, storage and the hot-reload registry
pub mod flow;

// Variable store, conditions, node executors and the graph walker
pub mod runtime;

// Per-counterparty state and its repositories
pub mod conversation;

// External services: messaging, LLM, commerce, payments, HTTP
pub mod collaborators;

// SQLite pool and schema
pub mod db;

// HTTP API layer - flow management, inbound webhook, conversations
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use conversation::{ConversationState, ConversationStore};
pub use error::{CollaboratorError, EngineError, GraphIntegrityError, NodeError};
pub use flow::{CompiledFlow, Edge, Flow, FlowRegistry, Node, NodeType};
pub use runtime::{ExecutionEngine, InboundMessage, WalkOutcome, WalkReport};
pub use server::start_server;
