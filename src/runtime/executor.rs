/// Node execution handlers
///
/// One strategy per node type behind a single entry point. Executors read the
/// variable store but never write it: they return the writes in a
/// [`NodeOutcome`] and the walker applies them after a schema check, which is
/// what makes rolling back an aborted segment possible.

use crate::collaborators::{guard::CallPolicy, ChatTurn, Collaborators};
use crate::error::NodeError;
use crate::flow::graph::{Branch, CompiledFlow, CompiledNode};
use crate::flow::types::NodeSpec;
use crate::runtime::nodes;
use crate::runtime::variables::{VarValue, VariableStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub company_id: String,
    pub phone: String,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Pin the message to one flow instead of the company's first accepting flow
    #[serde(default)]
    pub flow_id: Option<String>,
}

/// Read-only view of the conversation a node runs in
#[derive(Debug, Clone)]
pub struct ConversationContext<'a> {
    pub flow: &'a CompiledFlow,
    pub inbound: &'a InboundMessage,
    /// Prior turns, excluding the current inbound message
    pub history: Vec<ChatTurn>,
    pub first_message: bool,
}

/// Observable effect performed by a node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    MessageSent {
        node_id: String,
        to: String,
        text: String,
    },
    LanguageModelCalled {
        node_id: String,
        model: String,
        tokens: Option<u64>,
    },
    CommerceSearched {
        node_id: String,
        results: usize,
    },
    PaymentLinkCreated {
        node_id: String,
        url: String,
        reused: bool,
    },
    ApiCalled {
        node_id: String,
        url: String,
        status: u16,
    },
}

/// What executing one node produced
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub writes: Vec<(String, VarValue)>,
    /// Names among `writes` recording external effects that already happened;
    /// they survive a rollback of the segment
    pub durable: Vec<String>,
    /// Pause the walk here until the next inbound message
    pub awaits_input: bool,
    pub branch: Branch,
    pub effects: Vec<SideEffect>,
    /// Trigger declined the inbound event
    pub ignored: bool,
}

impl Default for NodeOutcome {
    fn default() -> Self {
        Self {
            writes: Vec::new(),
            durable: Vec::new(),
            awaits_input: false,
            branch: Branch::Any,
            effects: Vec::new(),
            ignored: false,
        }
    }
}

impl NodeOutcome {
    pub fn write(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        self.writes.push((name.into(), value.into()));
    }

    /// A write that is kept even if the segment is rolled back
    pub fn write_durable(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        let name = name.into();
        self.durable.push(name.clone());
        self.writes.push((name, value.into()));
    }

    pub fn ignored() -> Self {
        Self {
            ignored: true,
            branch: Branch::Nothing,
            ..Self::default()
        }
    }
}

/// `{node}.{field}`, the node-scoped output convention
pub fn scoped(node: &CompiledNode, field: &str) -> String {
    format!("{}.{}", node.id, field)
}

/// Dispatches nodes to their executors and holds the collaborators they call
#[derive(Debug, Clone)]
pub struct NodeExecutor {
    pub(crate) collaborators: Collaborators,
    pub(crate) policy: CallPolicy,
    pub(crate) default_model: String,
}

impl NodeExecutor {
    pub fn new(collaborators: Collaborators, policy: CallPolicy, default_model: impl Into<String>) -> Self {
        Self {
            collaborators,
            policy,
            default_model: default_model.into(),
        }
    }

    pub async fn execute_node(
        &self,
        node: &CompiledNode,
        store: &VariableStore,
        ctx: &ConversationContext<'_>,
    ) -> Result<NodeOutcome, NodeError> {
        tracing::info!("🚀 Executing node: {} (type: {:?})", node.id, node.node_type);
        let start_time = std::time::Instant::now();

        let result = match &node.spec {
            NodeSpec::Trigger(cfg) => Ok(nodes::trigger::execute(node, cfg, ctx)),
            NodeSpec::Gpt(cfg) => nodes::gpt::execute(self, node, cfg, store, ctx).await,
            NodeSpec::Router(_) => Ok(nodes::router::execute(node, store)),
            NodeSpec::Message(cfg) => nodes::message::execute(self, node, cfg, store).await,
            NodeSpec::CommerceSearch(cfg) => nodes::commerce::execute(self, node, cfg, store).await,
            NodeSpec::PaymentLink(cfg) => nodes::payment::execute(self, node, cfg, store, ctx).await,
            NodeSpec::Http(cfg) => nodes::http::execute(self, node, cfg, store).await,
            NodeSpec::Cart(cfg) => Ok(nodes::cart::execute(node, cfg, store)),
            NodeSpec::End => Ok(NodeOutcome::default()),
        };

        let duration = start_time.elapsed();
        match &result {
            Ok(outcome) => {
                tracing::info!("✅ Node completed: {} in {:?}", node.id, duration);
                tracing::debug!("📤 {} writes, awaits input: {}", outcome.writes.len(), outcome.awaits_input);
            }
            Err(e) => tracing::error!("❌ Node failed: {} in {:?} - {}", node.id, duration, e),
        }
        result
    }
}
