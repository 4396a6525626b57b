/// Conversation inspection and reset

use crate::api::{api_error, engine_error, ApiError, AppState};
use crate::conversation::ConversationState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};

pub fn create_conversation_routes() -> Router<AppState> {
    Router::new().route(
        "/api/conversations/{company_id}/{phone}",
        get(get_conversation).delete(reset_conversation),
    )
}

/// GET /api/conversations/{company_id}/{phone}
async fn get_conversation(
    State(state): State<AppState>,
    Path((company_id, phone)): Path<(String, String)>,
) -> Result<Json<ConversationState>, ApiError> {
    state
        .engine
        .conversation(&company_id, &phone)
        .await
        .map_err(engine_error)?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no conversation for {company_id}/{phone}")))
}

/// DELETE /api/conversations/{company_id}/{phone}
///
/// The next message from this counterparty starts its flow from the trigger.
async fn reset_conversation(
    State(state): State<AppState>,
    Path((company_id, phone)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let existed = state
        .engine
        .reset(&company_id, &phone)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({ "reset": existed })))
}
