/// Outbound WhatsApp message, the only node that can suspend a walk

use crate::collaborators::guard::guarded;
use crate::error::NodeError;
use crate::flow::graph::CompiledNode;
use crate::flow::types::{ListFormat, MessageConfig};
use crate::runtime::executor::{NodeExecutor, NodeOutcome, SideEffect};
use crate::runtime::template;
use crate::runtime::variables::{VarValue, VariableStore, SENDER_VAR};
use serde_json::Value;

const SERVICE: &str = "whatsapp";
const LIST_PLACEHOLDER: &str = "{{lista}}";

/// Render a list variable, one templated line per item.
///
/// Inside `item_template`, `{{index}}` is the 1-based position and
/// `{{item}}` / `{{item.field}}` address the current element; other
/// placeholders resolve against the store.
pub fn render_list(format: &ListFormat, store: &VariableStore) -> String {
    let items = match store.lookup(&format.variable) {
        VarValue::Set(Value::Array(items)) if !items.is_empty() => items,
        _ => return format.empty_text.clone().unwrap_or_default(),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let mut scope = VariableStore::new();
            scope.set("index", Value::from(i + 1));
            scope.set("item", item);
            template::resolve_with(&format.item_template, |path| match scope.lookup(path) {
                VarValue::Unset => store.lookup(path),
                found => found,
            })
            .into_owned()
        })
        .collect::<Vec<_>>()
        .join(&format.separator)
}

/// Final text: the list replaces `{{lista}}`, or is appended when the
/// template has no such marker
pub fn compose(cfg: &MessageConfig, store: &VariableStore) -> String {
    let Some(list) = &cfg.list else {
        return template::resolve(&cfg.message, store).into_owned();
    };

    let rendered = render_list(list, store);
    if let Some((before, after)) = cfg.message.split_once(LIST_PLACEHOLDER) {
        format!(
            "{}{}{}",
            template::resolve(before, store),
            rendered,
            template::resolve(after, store)
        )
    } else {
        let head = template::resolve(&cfg.message, store);
        if rendered.is_empty() {
            head.into_owned()
        } else {
            format!("{head}\n{rendered}")
        }
    }
}

pub async fn execute(
    exec: &NodeExecutor,
    node: &CompiledNode,
    cfg: &MessageConfig,
    store: &VariableStore,
) -> Result<NodeOutcome, NodeError> {
    let text = compose(cfg, store);
    let to = match &cfg.to {
        Some(t) => template::resolve(t, store).trim().to_string(),
        None => store.get(SENDER_VAR).render(),
    };
    if to.is_empty() {
        return Err(NodeError::Config {
            node_id: node.id.clone(),
            message: "message has no recipient".to_string(),
        });
    }

    let messenger = &exec.collaborators.messenger;
    let receipt = guarded(SERVICE, &exec.policy.once(), || messenger.send(&to, &text)).await?;
    tracing::info!("💬 Message sent by {} to {} ({:?})", node.id, to, receipt.message_id);

    Ok(NodeOutcome {
        awaits_input: cfg.await_reply,
        effects: vec![SideEffect::MessageSent {
            node_id: node.id.clone(),
            to,
            text,
        }],
        ..NodeOutcome::default()
    })
}
