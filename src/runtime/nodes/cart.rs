/// Conversation-local shopping cart
///
/// The cart lives in the variable store: `carrito_items` (array of
/// `{id, nombre, precio, cantidad}`), `carrito_items_count` (number of lines),
/// `carrito_total` (always numeric) and `carrito_id`.
///
/// A bad item or quantity leaves the cart untouched and writes
/// `{node}.error`, so the flow can branch on it.

use crate::flow::graph::CompiledNode;
use crate::flow::types::{CartAction, CartConfig};
use crate::runtime::executor::{scoped, NodeOutcome};
use crate::runtime::template;
use crate::runtime::variables::{VarValue, VariableStore};
use serde_json::{json, Map, Value};

pub const CART_ID: &str = "carrito_id";
pub const CART_ITEMS: &str = "carrito_items";
pub const CART_COUNT: &str = "carrito_items_count";
pub const CART_TOTAL: &str = "carrito_total";

fn number(value: Option<&Value>) -> Option<f64> {
    VarValue::from(value.cloned()).as_number()
}

fn item_id(item: &Value) -> String {
    VarValue::from(item.get("id").cloned()).render()
}

fn total(items: &[Value]) -> f64 {
    items
        .iter()
        .map(|item| number(item.get("precio")).unwrap_or(0.0) * number(item.get("cantidad")).unwrap_or(1.0))
        .sum()
}

/// Normalize a templated item: numeric price and quantity, quantity >= 1
fn normalize_item(raw: Value) -> Result<Map<String, Value>, String> {
    let mut item = match raw {
        Value::Object(item) => item,
        Value::Null => return Err("no hay producto para agregar".to_string()),
        other => return Err(format!("el producto debe ser un objeto, no {other}")),
    };
    if item_id(&Value::Object(item.clone())).is_empty() {
        return Err("el producto no tiene 'id'".to_string());
    }
    let price = number(item.get("precio")).unwrap_or(0.0);
    let quantity = number(item.get("cantidad")).filter(|q| *q >= 1.0).unwrap_or(1.0);
    item.insert("precio".into(), json!(price));
    item.insert("cantidad".into(), json!(quantity.trunc() as u64));
    Ok(item)
}

fn target_id(cfg: &CartConfig, store: &VariableStore) -> Result<String, String> {
    let id = cfg
        .item_id
        .as_deref()
        .map(|t| template::resolve(t, store).trim().to_string())
        .unwrap_or_default();
    if id.is_empty() {
        return Err("falta el id del producto".to_string());
    }
    Ok(id)
}

fn quantity(cfg: &CartConfig, store: &VariableStore) -> Result<u64, String> {
    let value = VarValue::from(template::resolve_value(&cfg.cantidad, store));
    value
        .as_number()
        .filter(|q| *q >= 0.0)
        .map(|q| q.trunc() as u64)
        .ok_or_else(|| format!("cantidad inválida: '{}'", value.render()))
}

fn apply(cfg: &CartConfig, store: &VariableStore, items: &mut Vec<Value>) -> Result<(), String> {
    match cfg.action {
        CartAction::Add => {
            let item = normalize_item(template::resolve_value(&cfg.item, store))?;
            let id = item_id(&Value::Object(item.clone()));
            match items.iter_mut().find(|existing| item_id(existing) == id) {
                Some(existing) => {
                    let merged = number(existing.get("cantidad")).unwrap_or(1.0)
                        + number(item.get("cantidad")).unwrap_or(1.0);
                    existing["cantidad"] = json!(merged.trunc() as u64);
                }
                None => items.push(Value::Object(item)),
            }
        }
        CartAction::Remove => {
            let id = target_id(cfg, store)?;
            items.retain(|existing| item_id(existing) != id);
        }
        CartAction::UpdateQuantity => {
            let id = target_id(cfg, store)?;
            let quantity = quantity(cfg, store)?;
            let Some(position) = items.iter().position(|existing| item_id(existing) == id) else {
                return Err(format!("el producto '{id}' no está en el carrito"));
            };
            if quantity == 0 {
                items.remove(position);
            } else {
                items[position]["cantidad"] = json!(quantity);
            }
        }
        CartAction::Clear => items.clear(),
        CartAction::View => {}
    }
    Ok(())
}

pub fn execute(node: &CompiledNode, cfg: &CartConfig, store: &VariableStore) -> NodeOutcome {
    let mut items = match store.get(CART_ITEMS) {
        VarValue::Set(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut outcome = NodeOutcome::default();
    if let Err(message) = apply(cfg, store, &mut items) {
        tracing::warn!("⚠️ Cart node {} ({:?}) failed: {}", node.id, cfg.action, message);
        outcome.write(scoped(node, "error"), Value::String(message));
        return outcome;
    }
    tracing::debug!("🛒 Cart {:?} by {}: {} lines", cfg.action, node.id, items.len());

    if !store.get(CART_ID).is_set() {
        outcome.write(CART_ID, Value::String(uuid::Uuid::new_v4().to_string()));
    }
    outcome.write(scoped(node, "error"), VarValue::Unset);
    outcome.write(CART_TOTAL, json!(total(&items)));
    outcome.write(CART_COUNT, json!(items.len()));
    outcome.write(CART_ITEMS, Value::Array(items));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::nodes::testing;

    fn run(action: Value, store: &mut VariableStore) {
        let flow = testing::single_node_flow(json!({ "id": "cart", "type": "cart", "config": action }));
        let node = flow.node(flow.index_of("cart").unwrap());
        let crate::flow::types::NodeSpec::Cart(cfg) = &node.spec else {
            panic!("not a cart node");
        };
        for (name, value) in execute(node, cfg, store).writes {
            store.set(name, value);
        }
    }

    fn two_lines() -> VariableStore {
        let mut store = VariableStore::new();
        run(json!({ "action": "add", "item": { "id": "a", "precio": 10 } }), &mut store);
        run(json!({ "action": "add", "item": { "id": "b", "precio": 5, "cantidad": 3 } }), &mut store);
        assert_eq!(store.get(CART_TOTAL).as_number(), Some(25.0));
        store
    }

    #[test]
    fn add_merges_and_totals_are_numeric() {
        let mut store = VariableStore::new();
        store.set("producto", json!({ "id": 7, "nombre": "Dune", "precio": "12000" }));
        let add = json!({ "action": "agregar", "item": "{{producto}}" });

        run(add.clone(), &mut store);
        run(add, &mut store);

        assert_eq!(store.get(CART_COUNT), VarValue::Set(json!(1)));
        assert_eq!(store.get(CART_TOTAL).as_number(), Some(24000.0));
        assert!(store.get(CART_TOTAL).as_value().is_some_and(Value::is_number));
        assert_eq!(store.lookup("carrito_items.0.cantidad"), VarValue::Set(json!(2)));
        assert!(store.get(CART_ID).is_set());
        assert!(!store.get("cart.error").is_set());
    }

    #[test]
    fn remove_and_clear() {
        let mut store = two_lines();

        store.set("quitar", json!("a"));
        run(json!({ "action": "quitar", "item_id": "{{quitar}}" }), &mut store);
        assert_eq!(store.get(CART_COUNT), VarValue::Set(json!(1)));

        run(json!({ "action": "eliminar", "itemId": "b" }), &mut store);
        assert_eq!(store.get(CART_COUNT), VarValue::Set(json!(0)));

        run(json!({ "action": "add", "item": { "id": "c", "precio": 1 } }), &mut store);
        run(json!({ "action": "vaciar" }), &mut store);
        assert_eq!(store.get(CART_ITEMS), VarValue::Set(json!([])));
        assert_eq!(store.get(CART_TOTAL).as_number(), Some(0.0));
    }

    #[test]
    fn update_quantity_sets_and_zero_removes() {
        let mut store = two_lines();

        store.set("nueva_cantidad", json!("4"));
        run(
            json!({ "action": "actualizar_cantidad", "item_id": "a", "cantidad": "{{nueva_cantidad}}" }),
            &mut store,
        );
        assert_eq!(store.lookup("carrito_items.0.cantidad"), VarValue::Set(json!(4)));
        assert_eq!(store.get(CART_TOTAL).as_number(), Some(55.0));

        run(json!({ "action": "update_quantity", "item_id": "b", "cantidad": 0 }), &mut store);
        assert_eq!(store.get(CART_COUNT), VarValue::Set(json!(1)));
        assert_eq!(store.get(CART_TOTAL).as_number(), Some(40.0));
    }

    #[test]
    fn bad_input_writes_error_and_keeps_cart() {
        let mut store = two_lines();
        let before = store.get(CART_ITEMS);

        // nothing selected yet
        run(json!({ "action": "add", "item": "{{producto_seleccionado}}" }), &mut store);
        assert!(store.get("cart.error").render().contains("no hay producto"));
        assert_eq!(store.get(CART_ITEMS), before);

        run(json!({ "action": "add", "item": { "nombre": "sin id" } }), &mut store);
        assert!(store.get("cart.error").render().contains("id"));

        run(json!({ "action": "actualizar_cantidad", "item_id": "zzz", "cantidad": 2 }), &mut store);
        assert!(store.get("cart.error").render().contains("zzz"));

        run(json!({ "action": "actualizar_cantidad", "item_id": "a", "cantidad": "muchos" }), &mut store);
        assert!(store.get("cart.error").render().contains("cantidad"));
        assert_eq!(store.get(CART_ITEMS), before);

        run(json!({ "action": "ver" }), &mut store);
        assert!(!store.get("cart.error").is_set());
    }

    #[test]
    fn non_finite_prices_count_as_zero() {
        let mut store = VariableStore::new();
        run(json!({ "action": "add", "item": { "id": "x", "precio": "NaN" } }), &mut store);
        run(json!({ "action": "add", "item": { "id": "y", "precio": "inf", "cantidad": 2 } }), &mut store);
        run(json!({ "action": "add", "item": { "id": "z", "precio": 3 } }), &mut store);

        assert_eq!(store.get(CART_TOTAL), VarValue::Set(json!(3.0)));
        assert_eq!(store.lookup("carrito_items.0.precio"), VarValue::Set(json!(0.0)));
    }
}
