/// Router: picks the first route whose condition holds

use crate::flow::graph::{select_guarded, Branch, CompiledNode};
use crate::runtime::executor::{scoped, NodeOutcome};
use crate::runtime::variables::VariableStore;
use serde_json::Value;

/// Pure: the only write is the label of the route taken.
///
/// A router without declared routes defers to its edge conditions.
pub fn execute(node: &CompiledNode, store: &VariableStore) -> NodeOutcome {
    if node.routes.is_empty() {
        return NodeOutcome::default();
    }

    match select_guarded(node.routes.iter(), store) {
        Some(route) => {
            tracing::debug!("🔀 Router {} took route '{}'", node.id, route.label);
            let mut outcome = NodeOutcome {
                branch: Branch::Handle(route.handle.clone()),
                ..NodeOutcome::default()
            };
            outcome.write(scoped(node, "ruta"), Value::String(route.label.clone()));
            outcome
        }
        None => NodeOutcome {
            branch: Branch::Nothing,
            ..NodeOutcome::default()
        },
    }
}
