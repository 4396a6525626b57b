/// WhatsApp Cloud API text messages

use super::{DeliveryReceipt, Messenger};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde_json::{json, Value};

const SERVICE: &str = "whatsapp";

#[derive(Debug, Clone)]
pub struct WhatsAppMessenger {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl WhatsAppMessenger {
    pub fn new(client: reqwest::Client, api_base: &str, phone_number_id: &str, token: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/{}/messages", api_base.trim_end_matches('/'), phone_number_id),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl Messenger for WhatsAppMessenger {
    async fn send(&self, phone: &str, text: &str) -> Result<DeliveryReceipt, CollaboratorError> {
        let body = json!({
            "messaging_product": "whatsapp",
            "to": phone,
            "type": "text",
            "text": { "body": text }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::failed(SERVICE, e))?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("status {status}"));
            return Err(CollaboratorError::failed(SERVICE, message));
        }

        tracing::debug!("📨 WhatsApp message accepted for {}", phone);
        Ok(DeliveryReceipt {
            message_id: payload["messages"][0]["id"].as_str().map(str::to_string),
        })
    }
}
