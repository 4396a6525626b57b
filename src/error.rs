/// Error taxonomy for flow compilation and conversational execution
///
/// Integrity errors are raised when a flow is compiled (activation/save time)
/// and, for the few checks that can only happen while walking, at runtime.
/// Collaborator and extraction errors originate inside node executors and are
/// converted into variable-store state wherever the graph can branch on them.

use crate::runtime::condition::ConditionParseError;
use thiserror::Error;

/// Structural problems with a flow document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphIntegrityError {
    #[error("Node id '{0}' is declared more than once")]
    DuplicateNode(String),

    #[error("Edge id '{0}' is declared more than once")]
    DuplicateEdge(String),

    #[error("Edge '{edge_id}' references missing {endpoint} node '{node_id}'")]
    DanglingEdge {
        edge_id: String,
        endpoint: &'static str,
        node_id: String,
    },

    #[error("Flow has no trigger node")]
    MissingTrigger,

    #[error("Flow has more than one trigger node: {0:?}")]
    MultipleTriggers(Vec<String>),

    #[error("Node '{node_id}' has an invalid configuration: {message}")]
    InvalidNodeConfig { node_id: String, message: String },

    #[error("Condition on '{owner}' is invalid: {source}")]
    InvalidCondition {
        owner: String,
        #[source]
        source: ConditionParseError,
    },

    #[error("Node '{0}' has only conditional outgoing edges and no fallback edge")]
    MissingFallback(String),

    #[error("Router '{node_id}' route '{route}' has no outgoing edge with that handle")]
    RouteWithoutEdge { node_id: String, route: String },

    #[error("Edge '{edge_id}' uses handle {handle:?} which router '{node_id}' does not declare")]
    UnknownRouteHandle {
        edge_id: String,
        node_id: String,
        handle: String,
    },

    #[error("Default value of variable '{name}' is not {expected}")]
    InvalidVariableDefault { name: String, expected: String },

    #[error("Node '{0}' has no eligible outgoing edge")]
    NoEligibleEdge(String),

    #[error("Walk exceeded {0} node executions without suspending")]
    StepLimitExceeded(usize),
}

/// Failure talking to an external collaborator (LLM, messaging, commerce, payments, HTTP)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("{service} timed out after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    #[error("{service} request failed: {message}")]
    Failed { service: String, message: String },

    #[error("{0} is not configured")]
    NotConfigured(String),
}

impl CollaboratorError {
    pub fn failed(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Failed {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

/// The language model did not produce parseable structured output
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Structured extraction failed: {0}")]
pub struct ExtractionError(pub String);

/// Errors a node executor can return to the graph walker
///
/// Anything recoverable inside the node (extraction failures, empty results)
/// never reaches this type; it is written into the variable store instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Node '{node_id}' cannot run: {message}")]
    Config { node_id: String, message: String },

    #[error("Variable '{name}' must be {expected}, node wrote {found}")]
    VariableType {
        name: String,
        expected: String,
        found: String,
    },
}

/// Errors surfaced by the conversation-level API of the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("No active flow for company '{0}' accepts this message")]
    NoMatchingFlow(String),

    #[error("Another walk for {company_id}/{phone} is still running")]
    ConcurrencyConflict { company_id: String, phone: String },

    #[error(transparent)]
    Integrity(#[from] GraphIntegrityError),

    #[error("Conversation storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}
