//! End-to-end walks through the engine with scripted collaborators.

mod common;

use common::*;
use convoflow::collaborators::scripted::{RecordingMessenger, Scripted, ScriptedModel, StaticCommerce};
use convoflow::conversation::{ConversationStore, Position};
use convoflow::runtime::{SideEffect, VarValue, WalkOutcome};
use convoflow::EngineError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn bookstore(reply: &str, catalogue: Vec<serde_json::Value>) -> Scripted {
    Scripted {
        llm: Arc::new(ScriptedModel::new([reply])),
        commerce: Arc::new(StaticCommerce::new(catalogue)),
        ..Scripted::default()
    }
}

fn dune() -> Vec<serde_json::Value> {
    vec![json!({ "id": 7, "nombre": "Dune", "precio": 12000 })]
}

#[tokio::test]
async fn missing_title_suspends_and_reply_resumes_the_search() {
    let scripted = bookstore(r#"{"titulo": null, "editorial": null}"#, dune());
    let (engine, _) = engine_with(&scripted, vec![bookstore_flow()]).await;

    let first = engine.handle_inbound(inbound("hola, quiero un libro")).await.unwrap();
    assert_eq!(first.outcome, WalkOutcome::Suspended { node_id: "pedir-titulo".into() });
    assert_eq!(first.visited, vec!["webhook-1", "gpt-1", "router-1", "pedir-titulo"]);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(
        state.position,
        Position::AwaitingInput {
            flow_id: "flow-libreria".into(),
            node_id: "pedir-titulo".into()
        }
    );
    assert!(!state.variables.contains("titulo"));
    assert_eq!(state.variables.get("router-1.ruta"), VarValue::Set(json!("faltan datos")));

    let second = engine.handle_inbound(inbound("Dune")).await.unwrap();
    assert_eq!(second.outcome, WalkOutcome::Finished { node_id: "fin".into() });
    assert_eq!(second.visited, vec!["woo", "lista", "fin"]);

    assert_eq!(
        scripted.messenger.texts(),
        vec!["¿Qué libro estás buscando?".to_string(), "Encontré:\n1. Dune $12000".to_string()]
    );
    assert_eq!(scripted.llm.requests().len(), 1);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(state.variables.get("titulo"), VarValue::Set(json!("Dune")));
    assert_eq!(state.history.len(), 4);
}

#[tokio::test]
async fn complete_extraction_walks_to_the_end_in_one_message() {
    let scripted = bookstore(r#"{"titulo": "Dune"}"#, dune());
    let (engine, _) = engine_with(&scripted, vec![bookstore_flow()]).await;

    let report = engine.handle_inbound(inbound("busco Dune")).await.unwrap();

    assert_eq!(report.outcome, WalkOutcome::Finished { node_id: "fin".into() });
    assert_eq!(report.steps, 6);
    assert!(report.effects.contains(&SideEffect::CommerceSearched {
        node_id: "woo".into(),
        results: 1
    }));

    // Optional field the model left out is unset, not an error
    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(!state.variables.contains("editorial"));
    assert_eq!(state.variables.get("gpt-1.variables_completas"), VarValue::Set(json!(true)));
    assert!(!state.variables.contains("gpt-1.error_extraccion"));
}

#[tokio::test]
async fn empty_search_writes_an_empty_list_and_takes_the_fallback_edge() {
    let scripted = bookstore(r#"{"titulo": "Rayuela"}"#, Vec::new());
    let (engine, _) = engine_with(&scripted, vec![bookstore_flow()]).await;

    let report = engine.handle_inbound(inbound("tenés Rayuela?")).await.unwrap();

    assert_eq!(report.outcome, WalkOutcome::Finished { node_id: "sin-resultados".into() });
    assert_eq!(scripted.messenger.texts(), vec!["No encontré \"Rayuela\"".to_string()]);
    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(state.variables.get("woo.productos"), VarValue::Set(json!([])));
}

#[tokio::test]
async fn unparseable_extraction_routes_to_the_incomplete_branch() {
    let scripted = bookstore("Perdón, no entendí", dune());
    let (engine, _) = engine_with(&scripted, vec![bookstore_flow()]).await;

    let report = engine.handle_inbound(inbound("???")).await.unwrap();

    assert_eq!(report.outcome, WalkOutcome::Suspended { node_id: "pedir-titulo".into() });
    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(state.variables.get("gpt-1.error_extraccion").is_set());
    assert_eq!(state.variables.get("gpt-1.variables_faltantes"), VarValue::Set(json!(["titulo"])));
}

#[tokio::test]
async fn stuck_walk_sends_fallback_and_next_message_starts_fresh() {
    let mut doc = flow_doc(
        "flow-ventas",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "venta", "type": "whatsapp", "config": { "message": "¡Vamos con la compra!" } }
        ]),
        json!([{ "id": "e1", "source": "webhook-1", "target": "venta",
                 "condition": "{{mensaje_usuario}} contains 'comprar'" }]),
    );
    doc["config"] = json!({ "flags": { "require_fallback_edges": false } });
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![doc]).await;

    let stuck = engine.handle_inbound(inbound("hola")).await.unwrap();
    assert_eq!(stuck.outcome, WalkOutcome::Stuck { node_id: "webhook-1".into() });
    assert_eq!(scripted.messenger.texts(), vec![FALLBACK.to_string()]);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(matches!(state.position, Position::Stuck { .. }));
    assert_eq!(state.variables.get("mensaje_usuario"), VarValue::Set(json!("hola")));

    let next = engine.handle_inbound(inbound("quiero comprar")).await.unwrap();
    assert_eq!(next.outcome, WalkOutcome::Finished { node_id: "venta".into() });
    assert_eq!(scripted.messenger.texts().last().map(String::as_str), Some("¡Vamos con la compra!"));
}

#[tokio::test]
async fn collaborator_exhaustion_rolls_back_and_replies_with_fallback() {
    let doc = flow_doc(
        "flow-charla",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "gpt-1", "type": "gpt", "config": { "system_prompt": "Sos amable" } },
            { "id": "respuesta", "type": "whatsapp", "config": { "message": "{{gpt-1.respuesta_gpt}}" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "gpt-1" },
            { "id": "e2", "source": "gpt-1", "target": "respuesta" }
        ]),
    );
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![doc]).await;

    let report = engine.handle_inbound(inbound("hola")).await.unwrap();
    match &report.outcome {
        WalkOutcome::Aborted { node_id, reason } => {
            assert_eq!(node_id.as_deref(), Some("gpt-1"));
            assert!(reason.contains("no scripted reply left"), "{reason}");
        }
        other => panic!("expected an abort, got {other:?}"),
    }
    // one attempt plus one retry
    assert_eq!(scripted.llm.requests().len(), 2);
    assert_eq!(scripted.messenger.texts(), vec![FALLBACK.to_string()]);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(state.variables.is_empty());
    assert_eq!(state.position, Position::Start);
    assert_eq!(state.history.len(), 2);

    scripted.llm.push_reply("¡Hola! ¿En qué te ayudo?");
    let retry = engine.handle_inbound(inbound("hola?")).await.unwrap();
    assert_eq!(retry.outcome, WalkOutcome::Finished { node_id: "respuesta".into() });
    assert_eq!(scripted.messenger.texts().last().map(String::as_str), Some("¡Hola! ¿En qué te ayudo?"));
}

#[tokio::test]
async fn cycles_are_cut_by_the_step_limit() {
    let mut doc = flow_doc(
        "flow-ciclo",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "a", "type": "cart", "config": { "action": "ver" } },
            { "id": "b", "type": "cart", "config": { "action": "ver" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "a" },
            { "id": "e2", "source": "a", "target": "b" },
            { "id": "e3", "source": "b", "target": "a" }
        ]),
    );
    doc["config"] = json!({ "flags": { "max_steps": 5 } });
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![doc]).await;

    let report = engine.handle_inbound(inbound("hola")).await.unwrap();

    assert!(matches!(&report.outcome, WalkOutcome::Aborted { reason, .. } if reason.contains('5')));
    assert_eq!(report.visited.len(), 5);
    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(!state.variables.contains("carrito_id"));
    assert_eq!(scripted.messenger.texts(), vec![FALLBACK.to_string()]);
}

#[tokio::test]
async fn deactivation_stops_an_in_flight_walk_at_the_next_transition() {
    let doc = flow_doc(
        "flow-aviso",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "aviso", "type": "whatsapp", "config": { "message": "Procesando..." } },
            { "id": "cierre", "type": "whatsapp", "config": { "message": "Listo" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "aviso" },
            { "id": "e2", "source": "aviso", "target": "cierre" }
        ]),
    );
    let scripted = Scripted {
        messenger: Arc::new(RecordingMessenger::with_delay(Duration::from_millis(300))),
        ..Scripted::default()
    };
    let (engine, _) = engine_with(&scripted, vec![doc]).await;

    let walking = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.handle_inbound(inbound("hola")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.registry().set_active("flow-aviso", false).await.unwrap();

    let report = walking.await.unwrap().unwrap();
    assert_eq!(report.outcome, WalkOutcome::Cancelled { node_id: "aviso".into() });
    assert_eq!(scripted.messenger.texts(), vec!["Procesando...".to_string()]);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(state.position, Position::Start);
}

#[tokio::test]
async fn messages_from_the_same_counterparty_are_serialized() {
    let doc = flow_doc(
        "flow-carrito",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "agregar", "type": "cart", "config": {
                "action": "agregar",
                "item": { "id": "{{mensaje_usuario}}", "nombre": "{{mensaje_usuario}}", "precio": 10 }
            }},
            { "id": "resumen", "type": "whatsapp", "config": { "message": "Tenés {{carrito_items_count}} productos" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "agregar" },
            { "id": "e2", "source": "agregar", "target": "resumen" }
        ]),
    );
    let scripted = Scripted {
        messenger: Arc::new(RecordingMessenger::with_delay(Duration::from_millis(50))),
        ..Scripted::default()
    };
    let (engine, store) = engine_with(&scripted, vec![doc]).await;

    let (a, b) = tokio::join!(
        engine.handle_inbound(inbound("libro-a")),
        engine.handle_inbound(inbound("libro-b")),
    );
    assert!(matches!(a.unwrap().outcome, WalkOutcome::Finished { .. }));
    assert!(matches!(b.unwrap().outcome, WalkOutcome::Finished { .. }));

    let mut texts = scripted.messenger.texts();
    texts.sort();
    assert_eq!(texts, vec!["Tenés 1 productos".to_string(), "Tenés 2 productos".to_string()]);

    let state = store.load(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(state.variables.get("carrito_items_count"), VarValue::Set(json!(2)));
    assert_eq!(state.variables.get("carrito_total").as_number(), Some(20.0));
}

#[tokio::test]
async fn flow_selection_by_trigger_and_pinning() {
    let ventas = greeting_flow("flow-a-ventas", json!({ "trigger": "keyword", "keyword": "comprar" }), "Ventas");
    let general = greeting_flow("flow-b-general", json!({ "trigger": "always" }), "General");
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![ventas, general]).await;

    let report = engine.handle_inbound(inbound_from("1", "Quiero COMPRAR")).await.unwrap();
    assert_eq!(report.flow_id.as_deref(), Some("flow-a-ventas"));

    let report = engine.handle_inbound(inbound_from("2", "hola")).await.unwrap();
    assert_eq!(report.flow_id.as_deref(), Some("flow-b-general"));

    let mut pinned = inbound_from("3", "hola");
    pinned.flow_id = Some("flow-inexistente".into());
    assert!(matches!(engine.handle_inbound(pinned).await, Err(EngineError::FlowNotFound(_))));

    let mut other_company = inbound_from("4", "hola");
    other_company.company_id = "otra-empresa".into();
    assert!(matches!(
        engine.handle_inbound(other_company).await,
        Err(EngineError::NoMatchingFlow(_))
    ));
}

#[tokio::test]
async fn declined_messages_are_ignored_without_persisting() {
    let first_only = greeting_flow("flow-bienvenida", json!({ "trigger": "first_message" }), "¡Bienvenido!");
    let scripted = Scripted::default();
    let (engine, store) = engine_with(&scripted, vec![first_only]).await;

    let welcome = engine.handle_inbound(inbound("hola")).await.unwrap();
    assert_eq!(welcome.outcome, WalkOutcome::Finished { node_id: "saludo".into() });
    let saved = store.load(COMPANY, PHONE).await.unwrap().unwrap();

    let again = engine.handle_inbound(inbound("hola de nuevo")).await.unwrap();
    assert_eq!(again.outcome, WalkOutcome::Ignored);
    assert_eq!(store.load(COMPANY, PHONE).await.unwrap().unwrap(), saved);
    assert_eq!(scripted.messenger.texts(), vec!["¡Bienvenido!".to_string()]);
}

#[tokio::test]
async fn reset_forgets_the_conversation() {
    let scripted = bookstore(r#"{}"#, dune());
    let (engine, store) = engine_with(&scripted, vec![bookstore_flow()]).await;

    engine.handle_inbound(inbound("hola")).await.unwrap();
    assert!(engine.reset(COMPANY, PHONE).await.unwrap());
    assert!(store.is_empty());
    assert!(!engine.reset(COMPANY, PHONE).await.unwrap());
}

/// webhook → payment link for the declared cart → gpt → reply
fn checkout_flow() -> serde_json::Value {
    let mut doc = flow_doc(
        "flow-pago",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "pago", "type": "mercadopago", "config": { "title": "Pedido", "amount": "{{carrito_total}}" } },
            { "id": "gpt-1", "type": "gpt", "config": { "system_prompt": "Confirmá el pedido" } },
            { "id": "respuesta", "type": "whatsapp", "config": { "message": "{{gpt-1.respuesta_gpt}} {{pago.link_pago}}" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "pago" },
            { "id": "e2", "source": "pago", "target": "gpt-1" },
            { "id": "e3", "source": "gpt-1", "target": "respuesta" }
        ]),
    );
    doc["config"] = json!({ "variables": [
        { "name": "carrito_total", "kind": "number", "default": 100 },
        { "name": "carrito_items", "kind": "array", "default": [
            { "id": "1", "nombre": "Dune", "precio": 100, "cantidad": 1 }
        ]}
    ]});
    doc
}

#[tokio::test]
async fn issued_payment_link_survives_a_rolled_back_walk() {
    // no scripted replies: the language model is down
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![checkout_flow()]).await;

    let first = engine.handle_inbound(inbound("pagar")).await.unwrap();
    assert!(matches!(&first.outcome, WalkOutcome::Aborted { node_id, .. } if node_id.as_deref() == Some("gpt-1")));

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(state.variables.get("pago.link_pago").render(), "https://pagos.example/checkout/1");
    assert!(state.variables.get("pago.dedupe_key").is_set());
    assert!(!state.variables.contains("gpt-1.respuesta_gpt"));

    let second = engine.handle_inbound(inbound("pagar")).await.unwrap();
    assert!(matches!(second.outcome, WalkOutcome::Aborted { .. }));
    assert!(second
        .effects
        .iter()
        .any(|e| matches!(e, SideEffect::PaymentLinkCreated { reused: true, .. })));
    assert_eq!(scripted.payments.calls(), 1);
    assert_eq!(scripted.messenger.texts(), vec![FALLBACK.to_string(), FALLBACK.to_string()]);
}

#[tokio::test]
async fn same_cart_sends_the_same_payment_reference() {
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![checkout_flow()]).await;

    engine.handle_inbound(inbound("pagar")).await.unwrap();
    // link forgotten, cart unchanged
    engine.reset(COMPANY, PHONE).await.unwrap();
    engine.handle_inbound(inbound("pagar")).await.unwrap();

    let requests = scripted.payments.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].reference, requests[1].reference);

    engine.handle_inbound(inbound_from("5491100000000", "pagar")).await.unwrap();
    assert_ne!(scripted.payments.requests()[2].reference, requests[0].reference);
}

/// webhook → gpt extracting `cantidad` (declared number) → confirm or ask again
fn quantity_flow() -> serde_json::Value {
    let mut doc = flow_doc(
        "flow-cantidad",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "gpt-1", "type": "gpt", "config": {
                "personality": "Tomás pedidos",
                "extraction": [{ "name": "cantidad", "required": true }]
            }},
            { "id": "confirmar", "type": "whatsapp", "config": { "message": "Anotado" } },
            { "id": "reintentar", "type": "whatsapp", "config": { "message": "¿Cuántos querés?" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "gpt-1" },
            { "id": "e2", "source": "gpt-1", "target": "confirmar", "condition": "{{gpt-1.variables_completas}} equals true" },
            { "id": "e3", "source": "gpt-1", "target": "reintentar" }
        ]),
    );
    doc["config"] = json!({ "variables": [{ "name": "cantidad", "kind": "number" }] });
    doc
}

#[tokio::test]
async fn extracted_text_is_coerced_to_the_declared_kind() {
    let scripted = Scripted {
        llm: Arc::new(ScriptedModel::new([r#"{"cantidad": "2"}"#])),
        ..Scripted::default()
    };
    let (engine, _) = engine_with(&scripted, vec![quantity_flow()]).await;

    let report = engine.handle_inbound(inbound("quiero dos")).await.unwrap();
    assert_eq!(report.outcome, WalkOutcome::Finished { node_id: "confirmar".into() });

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert_eq!(state.variables.get("cantidad").as_number(), Some(2.0));
    assert!(state.variables.get("cantidad").as_value().is_some_and(serde_json::Value::is_number));
    assert_eq!(scripted.messenger.texts(), vec!["Anotado".to_string()]);
}

#[tokio::test]
async fn extracted_value_of_the_wrong_kind_routes_instead_of_aborting() {
    let scripted = Scripted {
        llm: Arc::new(ScriptedModel::new([r#"{"cantidad": "muchos"}"#])),
        ..Scripted::default()
    };
    let (engine, _) = engine_with(&scripted, vec![quantity_flow()]).await;

    let report = engine.handle_inbound(inbound("quiero muchos")).await.unwrap();
    assert_eq!(report.outcome, WalkOutcome::Finished { node_id: "reintentar".into() });
    assert_eq!(scripted.messenger.texts(), vec!["¿Cuántos querés?".to_string()]);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(!state.variables.contains("cantidad"));
    assert_eq!(state.variables.get("gpt-1.variables_completas"), VarValue::Set(json!(false)));
    assert!(state.variables.get("gpt-1.error_extraccion").render().contains("cantidad"));
}

#[tokio::test]
async fn cart_without_a_selected_product_branches_on_the_error() {
    let doc = flow_doc(
        "flow-carrito",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "agregar", "type": "cart", "config": { "action": "agregar", "item": "{{producto_seleccionado}}" } },
            { "id": "elegir", "type": "whatsapp", "config": { "message": "Primero elegí un producto" } },
            { "id": "listo", "type": "whatsapp", "config": { "message": "Tenés {{carrito_items_count}} productos" } }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "agregar" },
            { "id": "e2", "source": "agregar", "target": "elegir", "condition": "{{agregar.error}} exists" },
            { "id": "e3", "source": "agregar", "target": "listo" }
        ]),
    );
    let scripted = Scripted::default();
    let (engine, _) = engine_with(&scripted, vec![doc]).await;

    let report = engine.handle_inbound(inbound("agregalo")).await.unwrap();
    assert_eq!(report.outcome, WalkOutcome::Finished { node_id: "elegir".into() });
    assert_eq!(scripted.messenger.texts(), vec!["Primero elegí un producto".to_string()]);

    let state = engine.conversation(COMPANY, PHONE).await.unwrap().unwrap();
    assert!(!state.variables.contains("carrito_items"));
    assert!(state.variables.get("agregar.error").is_set());
}
