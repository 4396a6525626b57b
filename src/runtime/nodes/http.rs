/// Generic external API call
///
/// URL, headers, query parameters and body are templates. An optional JSONPath
/// (`array_path`) picks the result list out of the response body.

use crate::collaborators::{guard::guarded, ApiRequest};
use crate::error::NodeError;
use crate::flow::graph::CompiledNode;
use crate::flow::types::HttpActionConfig;
use crate::runtime::executor::{scoped, NodeExecutor, NodeOutcome, SideEffect};
use crate::runtime::template;
use crate::runtime::variables::{VarValue, VariableStore};
use serde_json::Value;

const SERVICE: &str = "http";

/// Apply a JSONPath to a response body.
///
/// A single match that is already an array is returned as-is; otherwise the
/// matches are collected into an array.
pub fn select_array(body: &Value, path: &str) -> Result<Value, String> {
    let matches = jsonpath_lib::select(body, path).map_err(|e| format!("{e:?}"))?;
    match matches.as_slice() {
        [Value::Array(items)] => Ok(Value::Array(items.clone())),
        _ => Ok(Value::Array(matches.into_iter().cloned().collect())),
    }
}

fn build_request(cfg: &HttpActionConfig, store: &VariableStore) -> ApiRequest {
    let query = match template::resolve_value(&cfg.params, store) {
        Value::Object(map) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, VarValue::from(v).render()))
            .collect(),
        _ => Vec::new(),
    };

    ApiRequest {
        method: cfg.method.to_uppercase(),
        url: template::resolve(&cfg.url, store).into_owned(),
        headers: cfg
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), template::resolve(v, store).into_owned()))
            .collect(),
        query,
        body: cfg.body.as_ref().map(|b| template::resolve_value(b, store)),
    }
}

pub async fn execute(
    exec: &NodeExecutor,
    node: &CompiledNode,
    cfg: &HttpActionConfig,
    store: &VariableStore,
) -> Result<NodeOutcome, NodeError> {
    let request = build_request(cfg, store);
    let policy = if request.is_idempotent_read() {
        exec.policy.clone()
    } else {
        exec.policy.once()
    };

    let api = &exec.collaborators.http;
    let response = guarded(SERVICE, &policy, || api.call(&request)).await?;
    tracing::info!("✅ HTTP request completed: {} {} (status: {})", request.method, request.url, response.status);

    let mut outcome = NodeOutcome::default();
    outcome.effects.push(SideEffect::ApiCalled {
        node_id: node.id.clone(),
        url: request.url.clone(),
        status: response.status,
    });
    outcome.write(scoped(node, "status"), Value::from(response.status));

    if response.status >= 400 {
        tracing::warn!("⚠️ HTTP node {} got status {}", node.id, response.status);
        outcome.write(scoped(node, "error"), Value::String(format!("status {}", response.status)));
        outcome.write(
            cfg.output_variable.clone().unwrap_or_else(|| scoped(node, "respuesta")),
            VarValue::Unset,
        );
        return Ok(outcome);
    }

    let data = match &cfg.array_path {
        Some(path) => select_array(&response.body, path).map_err(|message| NodeError::Config {
            node_id: node.id.clone(),
            message: format!("invalid array_path '{path}': {message}"),
        })?,
        None => response.body,
    };
    outcome.write(
        cfg.output_variable.clone().unwrap_or_else(|| scoped(node, "respuesta")),
        data,
    );
    outcome.write(scoped(node, "error"), VarValue::Unset);
    Ok(outcome)
}
