/// Flow document types
///
/// A flow is persisted as one JSON document: nodes, edges and a config blob.
/// Node configuration stays loosely typed (`config: Value`) in the document and
/// is parsed into a typed [`NodeSpec`] once, when the flow is compiled.

use crate::error::GraphIntegrityError;
use crate::runtime::variables::VariableKind;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// A conversational workflow owned by one company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Unique flow identifier (e.g., "flow-libreria")
    pub id: String,
    pub name: String,
    /// Owning company; inbound messages are routed to the company's active flows
    pub company_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub config: FlowConfig,
}

/// A single node as stored in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the flow (e.g., "gpt-formateador", "router-1")
    pub id: String,
    /// Coarse role; defaults from the node type when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<NodeCategory>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Type-specific configuration, see the `*Config` structs below
    #[serde(default)]
    pub config: Value,
}

impl Node {
    pub fn effective_category(&self) -> NodeCategory {
        self.category.unwrap_or_else(|| self.node_type.default_category())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Trigger,
    Action,
    Processing,
}

/// Determines which executor runs the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Inbound WhatsApp message trigger
    Webhook,
    /// LLM call, optionally with structured extraction
    Gpt,
    /// Ordered labeled routes, each with a condition
    Router,
    /// Outbound WhatsApp message, the only node that may wait for a reply
    Whatsapp,
    /// Commerce catalogue search
    Woocommerce,
    /// Payment link creation
    Mercadopago,
    /// Generic external HTTP API call
    Http,
    /// Conversation-local shopping cart
    Cart,
    /// Explicit terminal marker
    End,
}

impl NodeType {
    pub fn default_category(&self) -> NodeCategory {
        match self {
            NodeType::Webhook => NodeCategory::Trigger,
            NodeType::Gpt | NodeType::Router | NodeType::Cart | NodeType::End => {
                NodeCategory::Processing
            }
            NodeType::Whatsapp | NodeType::Woocommerce | NodeType::Mercadopago | NodeType::Http => {
                NodeCategory::Action
            }
        }
    }
}

/// Directed, optionally conditioned transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Output port of a multi-output node (a router route id)
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// No condition means always eligible (fallback edge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Flow-wide configuration blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Declared global variables with kinds and default values
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    /// Knowledge snippets injected into generated GPT prompts
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub flags: FlowFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(default, alias = "type")]
    pub kind: VariableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowFlags {
    /// Reject flows where a node can only leave through conditional edges
    #[serde(default = "default_true")]
    pub require_fallback_edges: bool,
    /// Overrides the engine-wide node execution limit per walk segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
}

impl Default for FlowFlags {
    fn default() -> Self {
        Self {
            require_fallback_edges: true,
            max_steps: None,
        }
    }
}

/// Typed node configuration, parsed from `Node::config` at compile time
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Trigger(TriggerConfig),
    Gpt(GptConfig),
    Router(RouterConfig),
    Message(MessageConfig),
    CommerceSearch(CommerceConfig),
    PaymentLink(PaymentConfig),
    Http(HttpActionConfig),
    Cart(CartConfig),
    End,
}

impl NodeSpec {
    pub fn from_node(node: &Node) -> Result<Self, GraphIntegrityError> {
        let spec = match node.node_type {
            NodeType::Webhook => NodeSpec::Trigger(parse_config(node)?),
            NodeType::Gpt => NodeSpec::Gpt(parse_config(node)?),
            NodeType::Router => NodeSpec::Router(parse_config(node)?),
            NodeType::Whatsapp => NodeSpec::Message(parse_config(node)?),
            NodeType::Woocommerce => NodeSpec::CommerceSearch(parse_config(node)?),
            NodeType::Mercadopago => NodeSpec::PaymentLink(parse_config(node)?),
            NodeType::Http => NodeSpec::Http(parse_config(node)?),
            NodeType::Cart => NodeSpec::Cart(parse_config(node)?),
            NodeType::End => NodeSpec::End,
        };

        if let NodeSpec::Trigger(TriggerConfig { mode: TriggerMode::Keyword, keyword }) = &spec {
            if keyword.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(invalid(node, "keyword trigger needs a non-empty 'keyword'"));
            }
        }
        Ok(spec)
    }
}

fn invalid(node: &Node, message: impl Into<String>) -> GraphIntegrityError {
    GraphIntegrityError::InvalidNodeConfig {
        node_id: node.id.clone(),
        message: message.into(),
    }
}

fn parse_config<T: DeserializeOwned>(node: &Node) -> Result<T, GraphIntegrityError> {
    let raw = if node.config.is_null() {
        Value::Object(Default::default())
    } else {
        node.config.clone()
    };
    serde_json::from_value(raw).map_err(|e| invalid(node, e.to_string()))
}

/// When the trigger accepts an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Any message
    #[default]
    #[serde(alias = "message")]
    Always,
    /// Message text contains the keyword (case-insensitive)
    Keyword,
    /// Only the first message of a conversation
    FirstMessage,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default, rename = "trigger")]
    pub mode: TriggerMode,
    #[serde(default)]
    pub keyword: Option<String>,
}

/// A named field the model is asked to extract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionField {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: VariableKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptConfig {
    #[serde(default)]
    pub model: Option<String>,
    /// Explicit system prompt template; generated from the blocks below when absent
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default = "default_true")]
    pub include_topics: bool,
    #[serde(default = "default_true")]
    pub include_history: bool,
    /// User turn template, defaults to the inbound message text
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub extraction: Vec<ExtractionField>,
    /// Marker the model emits once it has gathered everything
    #[serde(default)]
    pub completion_token: Option<String>,
    /// Where the raw reply goes, defaults to `{node}.respuesta_gpt`
    #[serde(default)]
    pub output_variable: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Handle used by this route's outgoing edges; defaults to `route-{index}`
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// Renders a list variable, one templated line per item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFormat {
    pub variable: String,
    /// Per item, supports `{{index}}` (1-based) and `{{item.field}}`
    pub item_template: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub empty_text: Option<String>,
}

fn default_separator() -> String {
    "\n".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Message template; `{{lista}}` marks where a formatted list goes
    pub message: String,
    /// Recipient template, defaults to the inbound sender
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub await_reply: bool,
    /// Variable that receives the next inbound text when resuming
    #[serde(default)]
    pub save_reply_to: Option<String>,
    #[serde(default)]
    pub list: Option<ListFormat>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommerceConfig {
    /// Search parameter templates, e.g. `{"search": "{{titulo}}"}`
    #[serde(default)]
    pub params: Value,
    /// Defaults to `{node}.productos`
    #[serde(default)]
    pub output_variable: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub title: String,
    /// Number or template resolving to a number, e.g. "{{carrito_total}}"
    pub amount: Value,
    #[serde(default)]
    pub description: Option<String>,
    /// Template resolving to the item list, defaults to `{{carrito_items}}`
    #[serde(default)]
    pub items: Option<String>,
    /// Defaults to `{node}.link_pago`
    #[serde(default)]
    pub output_variable: Option<String>,
    /// Template identifying "the same cart"; defaults to items + total
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpActionConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameter templates
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub body: Option<Value>,
    /// JSONPath selecting the result list, e.g. "$.data.items"
    #[serde(default)]
    pub array_path: Option<String>,
    /// Defaults to `{node}.respuesta`
    #[serde(default)]
    pub output_variable: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartAction {
    #[serde(alias = "agregar")]
    Add,
    #[serde(alias = "ver")]
    View,
    #[serde(alias = "quitar", alias = "eliminar")]
    Remove,
    #[serde(alias = "vaciar")]
    Clear,
    /// Set a line's quantity; zero removes the line
    #[serde(alias = "actualizar_cantidad")]
    UpdateQuantity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartConfig {
    pub action: CartAction,
    /// Item field templates for `add`: id, nombre, precio, cantidad
    #[serde(default)]
    pub item: Value,
    /// Template of the item id for `remove` and `update_quantity`
    #[serde(default, alias = "itemId")]
    pub item_id: Option<String>,
    /// New quantity for `update_quantity`: a number or a template
    #[serde(default)]
    pub cantidad: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(node_type: NodeType, config: Value) -> Node {
        Node {
            id: "n1".into(),
            category: None,
            node_type,
            label: None,
            config,
        }
    }

    #[test]
    fn flow_document_deserializes_with_defaults() {
        let flow: Flow = serde_json::from_value(json!({
            "id": "f1",
            "name": "Librería",
            "company_id": "empresa-1",
            "nodes": [{ "id": "webhook-1", "type": "webhook" }],
            "edges": [{ "id": "e1", "source": "webhook-1", "target": "x", "sourceHandle": "route-0" }]
        }))
        .unwrap();
        assert!(flow.active);
        assert!(flow.config.flags.require_fallback_edges);
        assert_eq!(flow.nodes[0].effective_category(), NodeCategory::Trigger);
        assert_eq!(flow.edges[0].source_handle.as_deref(), Some("route-0"));
    }

    #[test]
    fn typed_specs_parse_from_config() {
        let gpt = node(
            NodeType::Gpt,
            json!({ "systemPrompt": "Hola {{nombre}}", "extraction": [{ "name": "titulo", "required": true }] }),
        );
        match NodeSpec::from_node(&gpt).unwrap() {
            NodeSpec::Gpt(cfg) => {
                assert_eq!(cfg.system_prompt.as_deref(), Some("Hola {{nombre}}"));
                assert!(cfg.extraction[0].required);
                assert!(cfg.include_history);
            }
            other => panic!("unexpected spec {other:?}"),
        }

        let cart = node(NodeType::Cart, json!({ "action": "agregar" }));
        assert!(matches!(
            NodeSpec::from_node(&cart).unwrap(),
            NodeSpec::Cart(CartConfig { action: CartAction::Add, .. })
        ));
        assert_eq!(NodeSpec::from_node(&node(NodeType::End, Value::Null)).unwrap(), NodeSpec::End);
    }

    #[test]
    fn invalid_configs_are_integrity_errors() {
        let missing_message = node(NodeType::Whatsapp, json!({}));
        assert!(matches!(
            NodeSpec::from_node(&missing_message),
            Err(GraphIntegrityError::InvalidNodeConfig { .. })
        ));

        let keyword_without_word = node(NodeType::Webhook, json!({ "trigger": "keyword" }));
        assert!(NodeSpec::from_node(&keyword_without_word).is_err());
    }
}
