//! Shared builders for integration tests: flow documents, engines wired to
//! scripted collaborators, inbound messages.
#![allow(dead_code)]

use chrono::Utc;
use convoflow::collaborators::guard::CallPolicy;
use convoflow::collaborators::scripted::Scripted;
use convoflow::config::EngineConfig;
use convoflow::conversation::{ConversationStore, InMemoryConversationStore};
use convoflow::flow::{Flow, FlowRegistry};
use convoflow::runtime::{ExecutionEngine, InboundMessage, NodeExecutor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const COMPANY: &str = "libreria-centro";
pub const PHONE: &str = "5491144443333";
pub const FALLBACK: &str = "Perdón, tuvimos un problema. Probá de nuevo en un rato.";

pub fn inbound(text: &str) -> InboundMessage {
    inbound_from(PHONE, text)
}

pub fn inbound_from(phone: &str, text: &str) -> InboundMessage {
    InboundMessage {
        company_id: COMPANY.to_string(),
        phone: phone.to_string(),
        text: text.to_string(),
        timestamp: Utc::now(),
        flow_id: None,
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        max_steps: 20,
        history_limit: 20,
        session_ttl_minutes: 30,
        lock_wait_secs: 5,
        fallback_message: FALLBACK.to_string(),
    }
}

pub fn executor(scripted: &Scripted) -> NodeExecutor {
    let policy = CallPolicy {
        timeout: Duration::from_secs(2),
        retries: 1,
        backoff: Duration::from_millis(1),
    };
    NodeExecutor::new(scripted.collaborators(), policy, "gpt-4o-mini")
}

/// Full flow document owned by [`COMPANY`]
pub fn flow_doc(id: &str, nodes: Value, edges: Value) -> Value {
    json!({
        "id": id,
        "name": format!("Flujo {id}"),
        "company_id": COMPANY,
        "active": true,
        "nodes": nodes,
        "edges": edges
    })
}

pub fn flow(doc: Value) -> Flow {
    serde_json::from_value(doc).expect("flow document should deserialize")
}

/// Engine over an in-memory registry and conversation store
pub async fn engine_with(scripted: &Scripted, docs: Vec<Value>) -> (Arc<ExecutionEngine>, Arc<InMemoryConversationStore>) {
    let store = Arc::new(InMemoryConversationStore::new());
    let engine = engine_over(scripted, docs, store.clone()).await;
    (engine, store)
}

pub async fn engine_over(
    scripted: &Scripted,
    docs: Vec<Value>,
    store: Arc<dyn ConversationStore>,
) -> Arc<ExecutionEngine> {
    let registry = Arc::new(FlowRegistry::in_memory());
    for doc in docs {
        registry.save_flow(flow(doc)).await.expect("flow should compile");
    }
    Arc::new(ExecutionEngine::new(
        registry,
        store,
        Arc::new(executor(scripted)),
        engine_config(),
    ))
}

/// The bookstore assistant:
///
/// webhook → gpt (extract titulo/editorial) → router
///   completo → woocommerce search → (results) list message → end
///                                  → (no results) apology
///   faltan   → ask for the title (waits, saves reply to `titulo`) → search
pub fn bookstore_flow() -> Value {
    flow_doc(
        "flow-libreria",
        json!([
            { "id": "webhook-1", "type": "webhook" },
            { "id": "gpt-1", "type": "gpt", "config": {
                "personality": "Sos el asistente de una librería",
                "extraction": [
                    { "name": "titulo", "required": true },
                    { "name": "editorial", "required": false }
                ]
            }},
            { "id": "router-1", "type": "router", "config": { "routes": [
                { "id": "completo", "label": "completo", "condition": "{{gpt-1.variables_completas}} equals true" },
                { "id": "faltan", "label": "faltan datos" }
            ]}},
            { "id": "pedir-titulo", "type": "whatsapp", "config": {
                "message": "¿Qué libro estás buscando?",
                "await_reply": true,
                "save_reply_to": "titulo"
            }},
            { "id": "woo", "type": "woocommerce", "config": { "params": { "search": "{{titulo}}" } } },
            { "id": "lista", "type": "whatsapp", "config": {
                "message": "Encontré:\n{{lista}}",
                "list": { "variable": "woo.productos", "item_template": "{{index}}. {{item.nombre}} ${{item.precio}}" }
            }},
            { "id": "sin-resultados", "type": "whatsapp", "config": { "message": "No encontré \"{{titulo}}\"" } },
            { "id": "fin", "type": "end" }
        ]),
        json!([
            { "id": "e1", "source": "webhook-1", "target": "gpt-1" },
            { "id": "e2", "source": "gpt-1", "target": "router-1" },
            { "id": "e3", "source": "router-1", "target": "woo", "source_handle": "completo" },
            { "id": "e4", "source": "router-1", "target": "pedir-titulo", "source_handle": "faltan" },
            { "id": "e5", "source": "pedir-titulo", "target": "woo" },
            { "id": "e6", "source": "woo", "target": "lista", "condition": "{{woo.count}} greater_than 0" },
            { "id": "e7", "source": "woo", "target": "sin-resultados" },
            { "id": "e8", "source": "lista", "target": "fin" }
        ]),
    )
}

/// webhook → one message node, nothing else
pub fn greeting_flow(id: &str, trigger: Value, message: &str) -> Value {
    flow_doc(
        id,
        json!([
            { "id": "webhook-1", "type": "webhook", "config": trigger },
            { "id": "saludo", "type": "whatsapp", "config": { "message": message } }
        ]),
        json!([{ "id": "e1", "source": "webhook-1", "target": "saludo" }]),
    )
}
