/// Commerce catalogue search (WooCommerce-style)

use crate::collaborators::guard::guarded;
use crate::error::NodeError;
use crate::flow::graph::CompiledNode;
use crate::flow::types::CommerceConfig;
use crate::runtime::executor::{scoped, NodeExecutor, NodeOutcome, SideEffect};
use crate::runtime::template;
use crate::runtime::variables::VariableStore;
use serde_json::Value;

const SERVICE: &str = "commerce";

/// Always writes the result list, `[]` when nothing matched, plus `{node}.count`
pub async fn execute(
    exec: &NodeExecutor,
    node: &CompiledNode,
    cfg: &CommerceConfig,
    store: &VariableStore,
) -> Result<NodeOutcome, NodeError> {
    let params = template::resolve_value(&cfg.params, store);
    tracing::debug!("🛒 Commerce search from {}: {}", node.id, params);

    let commerce = &exec.collaborators.commerce;
    let results = guarded(SERVICE, &exec.policy, || commerce.search(&params)).await?;
    let count = results.len();

    let mut outcome = NodeOutcome::default();
    outcome.write(
        cfg.output_variable
            .clone()
            .unwrap_or_else(|| scoped(node, "productos")),
        Value::Array(results),
    );
    outcome.write(scoped(node, "count"), Value::from(count));
    outcome.effects.push(SideEffect::CommerceSearched {
        node_id: node.id.clone(),
        results: count,
    });
    Ok(outcome)
}
