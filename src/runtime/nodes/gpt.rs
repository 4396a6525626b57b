/// GPT node: language-model call with optional structured extraction
///
/// Writes, with `{node}` the node id:
/// - `{node}.respuesta_gpt` (or `output_variable`): reply text, completion token removed
/// - `{node}.info_completa`: whether the completion token was present
/// - each extraction field under its own name, unset when the model left it out
/// - `{node}.variables_completas` / `{node}.variables_faltantes`
/// - `{node}.error_extraccion` when the reply was not a JSON object or a
///   field did not fit its declared kind (that field is left unset)

use crate::collaborators::{guard::guarded, CompletionRequest};
use crate::error::NodeError;
use crate::flow::graph::CompiledNode;
use crate::flow::types::GptConfig;
use crate::runtime::executor::{scoped, ConversationContext, NodeExecutor, NodeOutcome, SideEffect};
use crate::runtime::prompt::{self, DEFAULT_COMPLETION_TOKEN};
use crate::runtime::template;
use crate::runtime::variables::{VarValue, VariableStore};
use serde_json::{json, Value};

const SERVICE: &str = "language model";

pub async fn execute(
    exec: &NodeExecutor,
    node: &CompiledNode,
    cfg: &GptConfig,
    store: &VariableStore,
    ctx: &ConversationContext<'_>,
) -> Result<NodeOutcome, NodeError> {
    let request = CompletionRequest {
        model: cfg
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| exec.default_model.clone()),
        system_prompt: prompt::system_prompt(cfg, &ctx.flow.flow.config.topics, store),
        history: if cfg.include_history { ctx.history.clone() } else { Vec::new() },
        user_message: match &cfg.user_message {
            Some(t) => template::resolve(t, store).into_owned(),
            None => ctx.inbound.text.clone(),
        },
        schema: (!cfg.extraction.is_empty())
            .then(|| cfg.extraction.iter().map(|f| f.name.clone()).collect()),
    };
    tracing::debug!("🤖 GPT node {} prompt: {} chars, {} history turns",
        node.id, request.system_prompt.len(), request.history.len());

    let llm = &exec.collaborators.llm;
    let completion = guarded(SERVICE, &exec.policy, || llm.complete(&request)).await?;

    let token = cfg.completion_token.as_deref().unwrap_or(DEFAULT_COMPLETION_TOKEN);
    let (reply, complete) = prompt::take_completion_token(&completion.text, token);

    let mut outcome = NodeOutcome::default();
    outcome.effects.push(SideEffect::LanguageModelCalled {
        node_id: node.id.clone(),
        model: request.model.clone(),
        tokens: completion.tokens,
    });

    let output = cfg
        .output_variable
        .clone()
        .unwrap_or_else(|| scoped(node, "respuesta_gpt"));
    outcome.write(output, Value::String(reply.clone()));
    outcome.write(scoped(node, "info_completa"), Value::Bool(complete));

    if cfg.extraction.is_empty() {
        return Ok(outcome);
    }

    match prompt::parse_extraction(&reply) {
        Ok(fields) => {
            let mut view = store.clone();
            let mut rejected = Vec::new();
            for field in &cfg.extraction {
                let declared = ctx.flow.schema().kind_of(&field.name);
                let value = prompt::extracted_value(field, declared, fields.get(&field.name))
                    .unwrap_or_else(|e| {
                        tracing::warn!("⚠️ GPT node {}: {}", node.id, e);
                        rejected.push(e.to_string());
                        VarValue::Unset
                    });
                view.set(field.name.clone(), value.clone());
                outcome.write(field.name.clone(), value);
            }
            let missing = prompt::missing_required(&cfg.extraction, &view);
            tracing::debug!("🧩 GPT node {} extracted fields, missing: {:?}", node.id, missing);

            outcome.write(
                scoped(node, "variables_completas"),
                Value::Bool(missing.is_empty() && rejected.is_empty()),
            );
            outcome.write(scoped(node, "variables_faltantes"), json!(missing));
            if rejected.is_empty() {
                outcome.write(scoped(node, "error_extraccion"), VarValue::Unset);
            } else {
                outcome.write(scoped(node, "error_extraccion"), Value::String(rejected.join("; ")));
            }
        }
        Err(e) => {
            tracing::warn!("⚠️ GPT node {}: {}", node.id, e);
            let required: Vec<&str> = cfg
                .extraction
                .iter()
                .filter(|f| f.required)
                .map(|f| f.name.as_str())
                .collect();
            outcome.write(scoped(node, "variables_completas"), Value::Bool(false));
            outcome.write(scoped(node, "variables_faltantes"), json!(required));
            outcome.write(scoped(node, "error_extraccion"), Value::String(e.to_string()));
        }
    }
    Ok(outcome)
}
