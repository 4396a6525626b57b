/// Stand-ins for collaborators without credentials

use super::{
    Commerce, Completion, CompletionRequest, DeliveryReceipt, LanguageModel, Messenger, PaymentLink,
    PaymentRequest, Payments,
};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde_json::Value;

/// Fails every call with `NotConfigured`
#[derive(Debug, Clone)]
pub struct Unconfigured {
    service: String,
}

impl Unconfigured {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn error(&self) -> CollaboratorError {
        CollaboratorError::NotConfigured(self.service.clone())
    }
}

#[async_trait]
impl LanguageModel for Unconfigured {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, CollaboratorError> {
        Err(self.error())
    }
}

#[async_trait]
impl Commerce for Unconfigured {
    async fn search(&self, _params: &Value) -> Result<Vec<Value>, CollaboratorError> {
        Err(self.error())
    }
}

#[async_trait]
impl Payments for Unconfigured {
    async fn create_payment_link(&self, _request: &PaymentRequest) -> Result<PaymentLink, CollaboratorError> {
        Err(self.error())
    }
}

/// Development messenger: logs instead of delivering
#[derive(Debug, Clone, Copy)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, phone: &str, text: &str) -> Result<DeliveryReceipt, CollaboratorError> {
        tracing::info!("💬 [not delivered] to {}: {}", phone, text);
        Ok(DeliveryReceipt::default())
    }
}
