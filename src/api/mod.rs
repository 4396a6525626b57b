/// HTTP API Layer
///
/// REST endpoints for the validated flow write path, the inbound WhatsApp
/// webhook and conversation inspection/reset.

use crate::error::EngineError;
use crate::flow::FlowRegistry;
use crate::runtime::ExecutionEngine;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

// Flow management endpoints (CRUD, validate, activate/deactivate)
pub mod flows;

// Inbound message webhook
pub mod webhooks;

// Conversation state inspection and reset
pub mod conversations;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FlowRegistry>,
    pub engine: Arc<ExecutionEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            registry: Arc::clone(engine.registry()),
            engine,
        }
    }
}

/// Error half of every handler result: status plus `{ "error": ... }`
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub fn status_of(error: &EngineError) -> StatusCode {
    match error {
        EngineError::FlowNotFound(_) | EngineError::NoMatchingFlow(_) => StatusCode::NOT_FOUND,
        EngineError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        EngineError::Integrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn engine_error(error: EngineError) -> ApiError {
    let status = status_of(&error);
    if status.is_server_error() {
        tracing::error!("❌ Request failed: {}", error);
    } else {
        tracing::warn!("⚠️ Request rejected ({}): {}", status, error);
    }
    api_error(status, error)
}

/// Every route, with state applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(flows::create_flow_routes())
        .merge(webhooks::create_webhook_routes())
        .merge(conversations::create_conversation_routes())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
