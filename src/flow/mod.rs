/// Flow management layer
///
/// Flow document types, the compiled arena the walker runs on, SQLite
/// persistence and the hot-reload registry.

// Document shape as stored and exchanged over the API
pub mod types;

// Compiled, integrity-checked arena
pub mod graph;

// SQLite persistence
pub mod storage;

// ArcSwap registry, the validated write path
pub mod registry;

pub use graph::{Branch, CompiledFlow};
pub use registry::FlowRegistry;
pub use storage::FlowStorage;
pub use types::{Edge, Flow, Node, NodeCategory, NodeSpec, NodeType};
