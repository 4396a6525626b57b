/// Convoflow server entry point
///
/// Serves:
/// - Flow management API at /api/flows/*
/// - Inbound WhatsApp messages at /webhook/{company_id}
/// - Conversation inspection/reset at /api/conversations/{company_id}/{phone}
/// - Health check at /healthz

use convoflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Environment-driven, defaults to 0.0.0.0:3004 and ./data
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
