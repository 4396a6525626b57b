/// Flow management REST API endpoints
///
/// The only write path for flow documents: every create, update and
/// activation change compiles the flow first, so a document with dangling
/// edges or missing fallbacks is rejected with 422 and never reaches storage.

use crate::api::{api_error, engine_error, ApiError, AppState};
use crate::flow::{registry::FlowRegistry, types::Flow};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for flow write operations
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub id: String,
    pub active: bool,
    pub message: String,
}

/// Request body for flow creation, update and validation
#[derive(Debug, Deserialize)]
pub struct FlowRequest {
    pub flow: Flow,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub company_id: Option<String>,
}

pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", post(create_flow).get(list_flows))
        .route("/api/flows/validate", post(validate_flow))
        .route("/api/flows/{id}", get(get_flow).put(update_flow).delete(delete_flow))
        .route("/api/flows/{id}/activate", post(activate_flow))
        .route("/api/flows/{id}/deactivate", post(deactivate_flow))
}

fn require_fields(flow: &Flow) -> Result<(), ApiError> {
    if flow.id.trim().is_empty() || flow.name.trim().is_empty() || flow.company_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "flow needs id, name and company_id"));
    }
    Ok(())
}

/// POST /api/flows
/// Body: { "flow": { "id": "...", "name": "...", "company_id": "...", "nodes": [...], "edges": [...] } }
async fn create_flow(
    State(state): State<AppState>,
    Json(payload): Json<FlowRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    let flow = payload.flow;
    require_fields(&flow)?;

    if state.registry.get(&flow.id).is_some() {
        return Err(api_error(StatusCode::CONFLICT, format!("flow '{}' already exists", flow.id)));
    }

    let compiled = state.registry.save_flow(flow).await.map_err(engine_error)?;
    tracing::info!("🔥 Created flow: {} ({})", compiled.id(), compiled.flow.name);

    Ok(Json(FlowResponse {
        id: compiled.id().to_string(),
        active: compiled.flow.active,
        message: format!("Flow '{}' created successfully", compiled.flow.name),
    }))
}

/// GET /api/flows?company_id=...
async fn list_flows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    match state.registry.list_flows(query.company_id.as_deref()).await {
        Ok(flows) => Ok(Json(json!({ "flows": flows }))),
        Err(e) => {
            tracing::error!("Failed to list flows: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// GET /api/flows/{id}
async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Flow>, ApiError> {
    state
        .registry
        .get(&id)
        .map(|compiled| Json(compiled.flow.clone()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("flow '{id}' not found")))
}

/// PUT /api/flows/{id}
async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FlowRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    let mut flow = payload.flow;
    flow.id = id.clone();
    require_fields(&flow)?;

    if state.registry.get(&id).is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, format!("flow '{id}' not found")));
    }

    let compiled = state.registry.save_flow(flow).await.map_err(engine_error)?;
    tracing::info!("🔥 Hot-reloaded flow: {} ({})", compiled.id(), compiled.flow.name);

    Ok(Json(FlowResponse {
        id,
        active: compiled.flow.active,
        message: format!("Flow '{}' updated successfully", compiled.flow.name),
    }))
}

/// DELETE /api/flows/{id}
async fn delete_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.registry.remove_flow(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted flow: {}", id);
            Ok(Json(json!({ "message": "Flow deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("flow '{id}' not found"))),
        Err(e) => {
            tracing::error!("Failed to delete flow {}: {}", id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// POST /api/flows/validate
///
/// Dry run of the write path. Nothing is stored.
async fn validate_flow(Json(payload): Json<FlowRequest>) -> (StatusCode, Json<Value>) {
    let id = payload.flow.id.clone();
    match FlowRegistry::validate(payload.flow) {
        Ok(compiled) => (
            StatusCode::OK,
            Json(json!({
                "valid": true,
                "id": id,
                "nodes": compiled.node_count(),
                "edges": compiled.edge_count(),
            })),
        ),
        Err(e) => {
            tracing::debug!("🔍 Flow {} failed validation: {}", id, e);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "valid": false, "id": id, "error": e.to_string() })),
            )
        }
    }
}

async fn set_active(state: AppState, id: String, active: bool) -> Result<Json<FlowResponse>, ApiError> {
    let compiled = state.registry.set_active(&id, active).await.map_err(engine_error)?;
    let verb = if active { "activated" } else { "deactivated" };
    tracing::info!("🔁 Flow {} {}", id, verb);

    Ok(Json(FlowResponse {
        id,
        active: compiled.flow.active,
        message: format!("Flow '{}' {}", compiled.flow.name, verb),
    }))
}

/// POST /api/flows/{id}/activate
async fn activate_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, ApiError> {
    set_active(state, id, true).await
}

/// POST /api/flows/{id}/deactivate
///
/// In-flight walks of this flow stop at their next transition.
async fn deactivate_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, ApiError> {
    set_active(state, id, false).await
}
