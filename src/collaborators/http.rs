/// Generic HTTP calls for `http` action nodes

use super::{ApiRequest, ApiResponse, ExternalApi};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

const SERVICE: &str = "http";

#[derive(Debug, Clone)]
pub struct ReqwestApi {
    client: reqwest::Client,
}

impl ReqwestApi {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalApi for ReqwestApi {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, CollaboratorError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::failed(SERVICE, format!("unsupported method {}", request.method)))?;

        tracing::debug!("🌍 HTTP Request: {} {}", method, request.url);

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CollaboratorError::failed(SERVICE, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::failed(SERVICE, e))?;

        tracing::debug!("📡 Response status: {}", status);

        if status.is_server_error() {
            return Err(CollaboratorError::failed(SERVICE, format!("status {status}")));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}
