/// Inbound message webhook
///
/// One POST per WhatsApp message. The company comes from the path; the
/// engine picks the flow (or resumes the one the conversation waits on) and
/// the walk report is returned to the caller.

use crate::api::{api_error, engine_error, ApiError, AppState};
use crate::runtime::{InboundMessage, WalkReport};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Body accepted by the webhook
#[derive(Debug, Deserialize)]
pub struct InboundPayload {
    /// Counterparty phone number
    pub from: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flow_id: Option<String>,
}

impl InboundPayload {
    pub fn into_message(self, company_id: String) -> InboundMessage {
        InboundMessage {
            company_id,
            phone: self.from.trim().to_string(),
            text: self.text,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            flow_id: self.flow_id,
        }
    }
}

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{company_id}", post(receive_message))
}

/// POST /webhook/{company_id}
/// Body: { "from": "549...", "text": "hola", "timestamp"?: "...", "flow_id"?: "..." }
async fn receive_message(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    body: String,
) -> Result<Json<WalkReport>, ApiError> {
    tracing::info!("📥 Inbound message for company {}", company_id);
    tracing::debug!("📄 Request body: {}", body);

    // Parse manually so malformed payloads get a readable 400
    let payload: InboundPayload = serde_json::from_str(&body).map_err(|e| {
        tracing::warn!("❌ Invalid webhook payload for {}: {}", company_id, e);
        api_error(StatusCode::BAD_REQUEST, format!("invalid payload: {e}"))
    })?;
    if payload.from.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "'from' must not be empty"));
    }

    let start_time = std::time::Instant::now();
    let report = state
        .engine
        .handle_inbound(payload.into_message(company_id.clone()))
        .await
        .map_err(engine_error)?;

    tracing::info!("🎉 Message for {} handled in {:?}: {:?}", company_id, start_time.elapsed(), report.outcome);
    Ok(Json(report))
}
