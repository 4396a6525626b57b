use crate::collaborators::guard::CallPolicy;
use crate::collaborators::scripted::Scripted;
use crate::flow::graph::CompiledFlow;
use crate::runtime::executor::{ConversationContext, InboundMessage, NodeExecutor};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

pub const COMPANY: &str = "empresa-1";
pub const PHONE: &str = "5491155550000";

pub fn inbound(text: &str) -> InboundMessage {
    InboundMessage {
        company_id: COMPANY.into(),
        phone: PHONE.into(),
        text: text.into(),
        timestamp: Utc::now(),
        flow_id: None,
    }
}

/// Compile `{nodes, edges, config?}` into a flow owned by [`COMPANY`]
pub fn compile(mut doc: Value) -> CompiledFlow {
    doc["id"] = json!("flow-test");
    doc["name"] = json!("Flujo de prueba");
    doc["company_id"] = json!(COMPANY);
    CompiledFlow::compile(serde_json::from_value(doc).unwrap()).unwrap()
}

/// Trigger plus one node reachable from it
pub fn single_node_flow(node: Value) -> CompiledFlow {
    if node["type"] == "webhook" {
        return compile(json!({ "nodes": [node], "edges": [] }));
    }
    let id = node["id"].clone();
    compile(json!({
        "nodes": [{ "id": "webhook-1", "type": "webhook" }, node],
        "edges": [{ "id": "e0", "source": "webhook-1", "target": id }]
    }))
}

pub fn context<'a>(flow: &'a CompiledFlow, inbound: &'a InboundMessage) -> ConversationContext<'a> {
    ConversationContext {
        flow,
        inbound,
        history: Vec::new(),
        first_message: true,
    }
}

pub fn executor(scripted: &Scripted) -> NodeExecutor {
    let policy = CallPolicy {
        timeout: Duration::from_millis(200),
        retries: 2,
        backoff: Duration::from_millis(1),
    };
    NodeExecutor::new(scripted.collaborators(), policy, "gpt-4o-mini")
}
