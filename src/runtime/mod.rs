/// Conversational runtime
///
/// This module walks compiled flows one inbound message at a time:
/// - Variable store, templates and the condition language
/// - One executor per node type
/// - The graph walker with suspend/resume, rollback and fallback replies
/// - Per-counterparty serialization and the idle-conversation sweeper

pub mod condition;
pub mod template;
pub mod variables;

// GPT system prompt assembly and structured extraction parsing
pub mod prompt;

// Node executors and the dispatch entry point
pub mod executor;
pub mod nodes;

// Graph walker
pub mod engine;
pub mod locks;

// Background sweeper for idle conversations
pub mod scheduler;

pub use engine::{ExecutionEngine, WalkOutcome, WalkReport};
pub use executor::{InboundMessage, NodeExecutor, SideEffect};
pub use scheduler::ConversationSweeper;
pub use variables::{VarValue, VariableStore};
