/// External collaborators the engine calls into
///
/// Each collaborator is an async trait so the walker can run against the real
/// services in production and scripted fakes in tests. Implementations report
/// failures as [`CollaboratorError`]; timeouts and retries are applied by the
/// caller through [`guard::guarded`].

use crate::config::CollaboratorConfig;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

pub mod guard;
pub mod http;
pub mod openai;
pub mod scripted;
pub mod unconfigured;
pub mod whatsapp;

/// Outbound chat messaging (WhatsApp)
#[async_trait]
pub trait Messenger: Send + Sync + Debug {
    async fn send(&self, phone: &str, text: &str) -> Result<DeliveryReceipt, CollaboratorError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub user_message: String,
    /// Names of the fields to extract; asks the model for a JSON object
    pub schema: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens: Option<u64>,
}

/// Chat-completion language model
#[async_trait]
pub trait LanguageModel: Send + Sync + Debug {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollaboratorError>;
}

/// Product catalogue search
#[async_trait]
pub trait Commerce: Send + Sync + Debug {
    async fn search(&self, params: &Value) -> Result<Vec<Value>, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    pub title: String,
    pub amount: f64,
    pub description: Option<String>,
    pub items: Value,
    /// Stable reference derived from the cart; lets the provider reject duplicates
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub url: String,
    pub id: Option<String>,
}

/// Payment-link creation. Not idempotent: never retried by the engine.
#[async_trait]
pub trait Payments: Send + Sync + Debug {
    async fn create_payment_link(&self, request: &PaymentRequest) -> Result<PaymentLink, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// GET, HEAD and OPTIONS may be retried
    pub fn is_idempotent_read(&self) -> bool {
        matches!(self.method.to_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON when the body is JSON, otherwise the text as a JSON string
    pub body: Value,
}

/// Generic HTTP API used by `http` action nodes
#[async_trait]
pub trait ExternalApi: Send + Sync + Debug {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, CollaboratorError>;
}

/// The full set of collaborators handed to the node executor
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub messenger: Arc<dyn Messenger>,
    pub llm: Arc<dyn LanguageModel>,
    pub commerce: Arc<dyn Commerce>,
    pub payments: Arc<dyn Payments>,
    pub http: Arc<dyn ExternalApi>,
}

impl Collaborators {
    /// Wire the HTTP-backed collaborators from configuration.
    ///
    /// Without WhatsApp credentials outbound messages are only logged; without
    /// an OpenAI key GPT nodes fail as not configured.
    pub fn from_config(config: &CollaboratorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        let messenger: Arc<dyn Messenger> =
            match (&config.whatsapp_token, &config.whatsapp_phone_number_id) {
                (Some(token), Some(phone_number_id)) => Arc::new(whatsapp::WhatsAppMessenger::new(
                    client.clone(),
                    &config.whatsapp_api_base,
                    phone_number_id,
                    token,
                )),
                _ => {
                    tracing::warn!("⚠️ WhatsApp credentials missing, outbound messages will only be logged");
                    Arc::new(unconfigured::LogMessenger)
                }
            };

        let llm: Arc<dyn LanguageModel> = match &config.openai_api_key {
            Some(key) => Arc::new(openai::OpenAiModel::new(client.clone(), &config.openai_base_url, key)),
            None => {
                tracing::warn!("⚠️ OPENAI_API_KEY not set, GPT nodes will fail");
                Arc::new(unconfigured::Unconfigured::new("language model"))
            }
        };

        Ok(Self {
            messenger,
            llm,
            commerce: Arc::new(unconfigured::Unconfigured::new("commerce")),
            payments: Arc::new(unconfigured::Unconfigured::new("payments")),
            http: Arc::new(http::ReqwestApi::new(client)),
        })
    }
}
