/// System prompt assembly and structured-output handling for GPT nodes
///
/// A GPT node either carries an explicit `system_prompt` template or has one
/// generated from its personality, the flow's topic snippets and the fields it
/// must extract. Both forms are resolved against the variable store before the
/// call.

use crate::error::ExtractionError;
use crate::flow::types::{ExtractionField, GptConfig, Topic};
use crate::runtime::template;
use crate::runtime::variables::{VarValue, VariableKind, VariableStore};
use serde_json::{Map, Value};

pub const DEFAULT_COMPLETION_TOKEN: &str = "[INFO_COMPLETA]";

/// Final system prompt for a GPT node
pub fn system_prompt(config: &GptConfig, topics: &[Topic], store: &VariableStore) -> String {
    let raw = match &config.system_prompt {
        Some(explicit) if !explicit.trim().is_empty() => explicit.clone(),
        _ => build_system_prompt(config, topics),
    };
    template::resolve(&raw, store).into_owned()
}

/// Generated prompt: personality, topics, data collection, output format
pub fn build_system_prompt(config: &GptConfig, topics: &[Topic]) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(personality) = config.personality.as_deref().filter(|p| !p.trim().is_empty()) {
        lines.push("# PERSONALIDAD".into());
        lines.push(personality.to_string());
        lines.push(String::new());
    }

    if config.include_topics && !topics.is_empty() {
        lines.push("# INFORMACIÓN DISPONIBLE".into());
        lines.push("Usá esta información para responder consultas del usuario:".into());
        lines.push(String::new());
        for (i, topic) in topics.iter().enumerate() {
            lines.push(format!("## {}. {}", i + 1, topic.title));
            lines.push(topic.content.clone());
            if !topic.keywords.is_empty() {
                lines.push(format!("Palabras clave: {}", topic.keywords.join(", ")));
            }
            lines.push(String::new());
        }
        lines.push("Recurrí a estos temas cuando la intención del usuario se relacione, aunque no use las palabras clave exactas.".into());
        lines.push(String::new());
    }

    if !config.extraction.is_empty() {
        let (required, optional): (Vec<&ExtractionField>, Vec<&ExtractionField>) =
            config.extraction.iter().partition(|f| f.required);

        lines.push("# RECOPILACIÓN DE DATOS".into());
        lines.push("Tu tarea es obtener estos datos del cliente:".into());
        lines.push(String::new());
        push_fields(&mut lines, "## DATOS OBLIGATORIOS:", &required);
        push_fields(&mut lines, "## DATOS OPCIONALES:", &optional);

        let keys: Vec<&str> = config.extraction.iter().map(|f| f.name.as_str()).collect();
        lines.push("# FORMATO DE RESPUESTA".into());
        lines.push(format!(
            "Respondé únicamente con un objeto JSON con las claves: {}.",
            keys.join(", ")
        ));
        lines.push("Usá null para cada dato que el usuario todavía no haya dado. Interpretá errores de ortografía.".into());
        lines.push(String::new());
    }

    if let Some(token) = &config.completion_token {
        lines.push(format!(
            "Cuando tengas todos los datos obligatorios, incluí el texto {token} al final de tu respuesta."
        ));
    }

    lines.join("\n").trim_end().to_string()
}

fn push_fields(lines: &mut Vec<String>, heading: &str, fields: &[&ExtractionField]) {
    if fields.is_empty() {
        return;
    }
    lines.push(heading.to_string());
    for (i, field) in fields.iter().enumerate() {
        if field.description.is_empty() {
            lines.push(format!("{}. **{}**", i + 1, field.name));
        } else {
            lines.push(format!("{}. **{}** - {}", i + 1, field.name, field.description));
        }
    }
    lines.push(String::new());
}

/// Parse the JSON object the model was asked for.
///
/// Models often wrap the object in prose or code fences, so the outermost
/// `{ ... }` span is parsed.
pub fn parse_extraction(reply: &str) -> Result<Map<String, Value>, ExtractionError> {
    let start = reply
        .find('{')
        .ok_or_else(|| ExtractionError("reply contains no JSON object".into()))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ExtractionError("reply contains no complete JSON object".into()))?;

    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ExtractionError("reply JSON is not an object".into())),
        Err(e) => Err(ExtractionError(e.to_string())),
    }
}

/// Required field names that are still unset or blank
pub fn missing_required(fields: &[ExtractionField], store: &VariableStore) -> Vec<String> {
    fields
        .iter()
        .filter(|f| f.required && store.get(&f.name).is_empty())
        .map(|f| f.name.clone())
        .collect()
}

/// Normalize one extracted value: blank strings and "null" text become unset.
///
/// The field's own kind wins; otherwise `declared` (the flow's schema kind)
/// is used. Values that cannot be coerced to that kind are rejected.
pub fn extracted_value(
    field: &ExtractionField,
    declared: VariableKind,
    raw: Option<&Value>,
) -> Result<VarValue, ExtractionError> {
    let kind = match field.kind {
        VariableKind::Any => declared,
        kind => kind,
    };
    match raw {
        None | Some(Value::Null) => Ok(VarValue::Unset),
        Some(Value::String(s)) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("null") => Ok(VarValue::Unset),
        Some(v) => {
            let value = kind.coerce(v.clone());
            if kind.accepts(&value) {
                Ok(VarValue::Set(value))
            } else {
                Err(ExtractionError(format!("'{}' must be {}, got {}", field.name, kind.name(), v)))
            }
        }
    }
}

/// Strip the completion token; returns the cleaned reply and whether it was present
pub fn take_completion_token(reply: &str, token: &str) -> (String, bool) {
    if token.is_empty() || !reply.contains(token) {
        return (reply.to_string(), false);
    }
    (reply.replace(token, "").trim().to_string(), true)
}
