/// OpenAI-compatible chat completions client

use super::{ChatRole, Completion, CompletionRequest, LanguageModel};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde_json::{json, Value};

const SERVICE: &str = "language model";

#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiModel {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }
}

/// Request body in the chat-completions wire format
pub fn request_body(request: &CompletionRequest) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
    for turn in &request.history {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": turn.content }));
    }
    messages.push(json!({ "role": "user", "content": request.user_message }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "temperature": 0.7,
    });
    if request.schema.is_some() {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CollaboratorError> {
        tracing::debug!("🤖 Chat completion with model {}", request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| CollaboratorError::failed(SERVICE, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::failed(SERVICE, e))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("status {status}"));
            return Err(CollaboratorError::failed(SERVICE, message));
        }

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CollaboratorError::failed(SERVICE, "response has no message content"))?
            .to_string();

        Ok(Completion {
            text,
            tokens: payload["usage"]["total_tokens"].as_u64(),
        })
    }
}
