/// Payment-link creation (MercadoPago-style)
///
/// Creating a link is not idempotent, so the call is made once and guarded by
/// a deduplication key: when the key matches the one stored with the last
/// issued link, that link is reused and the collaborator is not called. The
/// key and the issued link are durable writes, so a later failure in the same
/// walk does not forget a link that already exists. The provider reference is
/// a name-based UUID of the key, stable across retries of the same cart.

use crate::collaborators::{guard::guarded, PaymentRequest};
use crate::error::NodeError;
use crate::flow::graph::CompiledNode;
use crate::flow::types::PaymentConfig;
use crate::runtime::executor::{scoped, ConversationContext, NodeExecutor, NodeOutcome, SideEffect};
use crate::runtime::template;
use crate::runtime::variables::{VarValue, VariableStore};
use serde_json::Value;
use uuid::Uuid;

const SERVICE: &str = "payments";
const DEFAULT_ITEMS: &str = "{{carrito_items}}";
const DEFAULT_DEDUPE_KEY: &str = "{{carrito_items}}:{{carrito_total}}";

/// Amount as a positive number; literals or templates resolving to numeric text
pub fn resolve_amount(amount: &Value, store: &VariableStore) -> Option<f64> {
    let value = match amount {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => template::resolve(s, store).trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Provider reference for one dedup key of one node in one conversation
pub fn payment_reference(node: &CompiledNode, ctx: &ConversationContext<'_>, key: &str) -> String {
    let name = format!(
        "{}:{}:{}:{}:{}",
        ctx.inbound.company_id,
        ctx.inbound.phone,
        ctx.flow.id(),
        node.id,
        key
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub async fn execute(
    exec: &NodeExecutor,
    node: &CompiledNode,
    cfg: &PaymentConfig,
    store: &VariableStore,
    ctx: &ConversationContext<'_>,
) -> Result<NodeOutcome, NodeError> {
    let mut outcome = NodeOutcome::default();
    let link_var = cfg
        .output_variable
        .clone()
        .unwrap_or_else(|| scoped(node, "link_pago"));
    let key_var = scoped(node, "dedupe_key");
    let error_var = scoped(node, "error");

    let Some(amount) = resolve_amount(&cfg.amount, store) else {
        tracing::warn!("⚠️ Payment node {} has no valid amount ({})", node.id, cfg.amount);
        outcome.write(error_var, Value::String(format!("monto inválido: {}", cfg.amount)));
        return Ok(outcome);
    };

    let key = template::resolve(cfg.dedupe_key.as_deref().unwrap_or(DEFAULT_DEDUPE_KEY), store).into_owned();
    if let (VarValue::Set(previous_key), VarValue::Set(link)) = (store.get(&key_var), store.get(&link_var)) {
        if previous_key.as_str() == Some(key.as_str()) {
            tracing::info!("♻️ Payment node {} reusing link for unchanged cart", node.id);
            outcome.effects.push(SideEffect::PaymentLinkCreated {
                node_id: node.id.clone(),
                url: VarValue::Set(link).render(),
                reused: true,
            });
            outcome.write(scoped(node, "reutilizado"), Value::Bool(true));
            return Ok(outcome);
        }
    }

    let request = PaymentRequest {
        title: template::resolve(&cfg.title, store).into_owned(),
        amount,
        description: cfg
            .description
            .as_deref()
            .map(|d| template::resolve(d, store).into_owned()),
        items: template::resolve_value(
            &Value::String(cfg.items.clone().unwrap_or_else(|| DEFAULT_ITEMS.to_string())),
            store,
        ),
        reference: payment_reference(node, ctx, &key),
    };

    let payments = &exec.collaborators.payments;
    let link = guarded(SERVICE, &exec.policy.once(), || payments.create_payment_link(&request)).await?;
    tracing::info!("💳 Payment link created by {}: {}", node.id, link.url);

    outcome.effects.push(SideEffect::PaymentLinkCreated {
        node_id: node.id.clone(),
        url: link.url.clone(),
        reused: false,
    });
    outcome.write_durable(link_var, Value::String(link.url));
    outcome.write_durable(scoped(node, "pago_id"), link.id.map(Value::String));
    outcome.write_durable(key_var, Value::String(key));
    outcome.write(scoped(node, "reutilizado"), Value::Bool(false));
    outcome.write(error_var, VarValue::Unset);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::scripted::Scripted;
    use crate::runtime::nodes::testing;
    use serde_json::json;

    fn cart_store() -> VariableStore {
        let mut store = VariableStore::new();
        store.set("carrito_items", json!([{ "id": "1", "nombre": "Dune", "precio": 12000, "cantidad": 1 }]));
        store.set("carrito_total", json!(12000));
        store
    }

    async fn pay(scripted: &Scripted, store: &VariableStore) -> NodeOutcome {
        let flow = testing::single_node_flow(json!({
            "id": "mp",
            "type": "mercadopago",
            "config": { "title": "Pedido", "amount": "{{carrito_total}}" }
        }));
        let inbound = testing::inbound("pagar");
        let ctx = testing::context(&flow, &inbound);
        let index = flow.index_of("mp").unwrap();
        testing::executor(scripted)
            .execute_node(flow.node(index), store, &ctx)
            .await
            .unwrap()
    }

    fn apply(store: &mut VariableStore, outcome: &NodeOutcome) {
        for (name, value) in &outcome.writes {
            store.set(name.clone(), value.clone());
        }
    }

    #[tokio::test]
    async fn same_cart_reuses_link() {
        let scripted = Scripted::default();
        let mut store = cart_store();

        let first = pay(&scripted, &store).await;
        apply(&mut store, &first);
        assert_eq!(store.get("mp.link_pago").render(), "https://pagos.example/checkout/1");

        let second = pay(&scripted, &store).await;
        assert_eq!(scripted.payments.calls(), 1);
        assert!(second.writes.contains(&("mp.reutilizado".to_string(), VarValue::Set(json!(true)))));

        store.set("carrito_total", json!(24000));
        let third = pay(&scripted, &store).await;
        apply(&mut store, &third);
        assert_eq!(scripted.payments.calls(), 2);
        assert_eq!(scripted.payments.requests()[1].amount, 24000.0);
        assert_ne!(scripted.payments.requests()[0].reference, scripted.payments.requests()[1].reference);
    }

    #[tokio::test]
    async fn issued_link_is_durable_and_reference_is_stable() {
        let scripted = Scripted::default();
        let store = cart_store();

        let first = pay(&scripted, &store).await;
        assert!(first.durable.contains(&"mp.link_pago".to_string()));
        assert!(first.durable.contains(&"mp.dedupe_key".to_string()));
        assert!(!first.durable.contains(&"mp.reutilizado".to_string()));

        // same cart, link forgotten: the provider still sees the same reference
        pay(&scripted, &store).await;
        let requests = scripted.payments.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].reference, requests[1].reference);
    }

    #[tokio::test]
    async fn invalid_amount_is_a_soft_error() {
        let scripted = Scripted::default();
        let outcome = pay(&scripted, &VariableStore::new()).await;
        assert_eq!(scripted.payments.calls(), 0);
        assert!(outcome.writes.iter().any(|(n, v)| n == "mp.error" && v.is_set()));
    }

    #[test]
    fn amount_resolution() {
        let store = cart_store();
        assert_eq!(resolve_amount(&json!(150.5), &store), Some(150.5));
        assert_eq!(resolve_amount(&json!("{{carrito_total}}"), &store), Some(12000.0));
        assert_eq!(resolve_amount(&json!("{{nada}}"), &store), None);
        assert_eq!(resolve_amount(&json!(-3), &store), None);
    }
}
