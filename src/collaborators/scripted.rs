/// Scripted in-process collaborators
///
/// Deterministic stand-ins that record every call. Used by the test suites and
/// for running flows locally without external accounts.

use super::{
    ApiRequest, ApiResponse, Collaborators, Commerce, Completion, CompletionRequest, DeliveryReceipt,
    ExternalApi, LanguageModel, Messenger, PaymentLink, PaymentRequest, Payments,
};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replies in the order they were queued
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::default();
        for reply in replies {
            model.push_reply(reply);
        }
        model
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: CollaboratorError) {
        lock(&self.replies).push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollaboratorError> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.replies).pop_front();
        match next {
            Some(Ok(text)) => Ok(Completion { text, tokens: Some(42) }),
            Some(Err(e)) => Err(e),
            None => Err(CollaboratorError::failed("language model", "no scripted reply left")),
        }
    }
}

/// Records messages instead of delivering them
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each send sleeps first, to widen race windows in concurrency tests
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// (phone, text) pairs in send order
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|(_, text)| text.clone()).collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, phone: &str, text: &str) -> Result<DeliveryReceipt, CollaboratorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut sent = lock(&self.sent);
        sent.push((phone.to_string(), text.to_string()));
        Ok(DeliveryReceipt {
            message_id: Some(format!("wamid.{}", sent.len())),
        })
    }
}

/// Fixed catalogue; can be told to fail the first N calls
#[derive(Debug, Default)]
pub struct StaticCommerce {
    results: Vec<Value>,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl StaticCommerce {
    pub fn new(results: Vec<Value>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    pub fn failing_first(self, failures: u32) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Commerce for StaticCommerce {
    async fn search(&self, _params: &Value) -> Result<Vec<Value>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::failed("commerce", "503 Service Unavailable"));
        }
        Ok(self.results.clone())
    }
}

/// Issues numbered links and counts calls
#[derive(Debug, Default)]
pub struct CountingPayments {
    calls: AtomicU32,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl CountingPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Payments for CountingPayments {
    async fn create_payment_link(&self, request: &PaymentRequest) -> Result<PaymentLink, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.requests).push(request.clone());
        Ok(PaymentLink {
            url: format!("https://pagos.example/checkout/{n}"),
            id: Some(format!("pref-{n}")),
        })
    }
}

/// Returns one canned response for every request
#[derive(Debug)]
pub struct CannedApi {
    response: ApiResponse,
    requests: Mutex<Vec<ApiRequest>>,
}

impl CannedApi {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            response: ApiResponse { status, body },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ExternalApi for CannedApi {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, CollaboratorError> {
        lock(&self.requests).push(request.clone());
        Ok(self.response.clone())
    }
}

/// Typed handles to every scripted collaborator
#[derive(Debug, Clone)]
pub struct Scripted {
    pub messenger: Arc<RecordingMessenger>,
    pub llm: Arc<ScriptedModel>,
    pub commerce: Arc<StaticCommerce>,
    pub payments: Arc<CountingPayments>,
    pub http: Arc<CannedApi>,
}

impl Default for Scripted {
    fn default() -> Self {
        Self {
            messenger: Arc::new(RecordingMessenger::new()),
            llm: Arc::new(ScriptedModel::default()),
            commerce: Arc::new(StaticCommerce::default()),
            payments: Arc::new(CountingPayments::new()),
            http: Arc::new(CannedApi::new(200, Value::Null)),
        }
    }
}

impl Scripted {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            messenger: self.messenger.clone(),
            llm: self.llm.clone(),
            commerce: self.commerce.clone(),
            payments: self.payments.clone(),
            http: self.http.clone(),
        }
    }
}
