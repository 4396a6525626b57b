/// Webhook trigger: decides whether the inbound message starts this flow

use crate::flow::graph::CompiledNode;
use crate::flow::types::{TriggerConfig, TriggerMode};
use crate::runtime::executor::{ConversationContext, InboundMessage, NodeOutcome};
use crate::runtime::variables::{MESSAGE_VAR, SENDER_VAR, TIMESTAMP_VAR};
use serde_json::Value;

/// Whether the trigger's activation condition holds for this message
pub fn accepts(cfg: &TriggerConfig, inbound: &InboundMessage, first_message: bool) -> bool {
    match cfg.mode {
        TriggerMode::Always => true,
        TriggerMode::FirstMessage => first_message,
        TriggerMode::Keyword => cfg.keyword.as_deref().is_some_and(|keyword| {
            inbound
                .text
                .to_lowercase()
                .contains(&keyword.trim().to_lowercase())
        }),
    }
}

/// Well-known variables written for every inbound message
pub fn inbound_writes(inbound: &InboundMessage) -> Vec<(String, Value)> {
    vec![
        (MESSAGE_VAR.to_string(), Value::String(inbound.text.clone())),
        (SENDER_VAR.to_string(), Value::String(inbound.phone.clone())),
        (TIMESTAMP_VAR.to_string(), Value::String(inbound.timestamp.to_rfc3339())),
    ]
}

pub fn execute(node: &CompiledNode, cfg: &TriggerConfig, ctx: &ConversationContext<'_>) -> NodeOutcome {
    if !accepts(cfg, ctx.inbound, ctx.first_message) {
        tracing::debug!("🚫 Trigger {} declined message from {}", node.id, ctx.inbound.phone);
        return NodeOutcome::ignored();
    }

    let mut outcome = NodeOutcome::default();
    for (name, value) in inbound_writes(ctx.inbound) {
        outcome.write(name, value);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::testing;
    use crate::runtime::variables::VarValue;
    use serde_json::json;

    fn cfg(value: Value) -> TriggerConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let inbound = testing::inbound("Quiero COMPRAR un libro");
        let keyword = cfg(json!({ "trigger": "keyword", "keyword": "comprar" }));
        assert!(accepts(&keyword, &inbound, false));
        let other = cfg(json!({ "trigger": "keyword", "keyword": "turno" }));
        assert!(!accepts(&other, &inbound, false));
    }

    #[test]
    fn first_message_mode_only_fires_once() {
        let inbound = testing::inbound("hola");
        let first = cfg(json!({ "trigger": "first_message" }));
        assert!(accepts(&first, &inbound, true));
        assert!(!accepts(&first, &inbound, false));
        assert!(accepts(&cfg(json!({ "trigger": "message" })), &inbound, false));
    }

    #[test]
    fn accepted_message_writes_inbound_variables() {
        let flow = testing::single_node_flow(json!({ "id": "webhook-1", "type": "webhook" }));
        let inbound = testing::inbound("hola");
        let ctx = testing::context(&flow, &inbound);
        let node = flow.node(flow.trigger());
        let outcome = execute(node, &TriggerConfig::default(), &ctx);
        assert!(!outcome.ignored);
        assert!(outcome
            .writes
            .contains(&(MESSAGE_VAR.to_string(), VarValue::Set(json!("hola")))));
        assert!(outcome
            .writes
            .contains(&(SENDER_VAR.to_string(), VarValue::Set(json!(testing::PHONE)))));
    }
}
