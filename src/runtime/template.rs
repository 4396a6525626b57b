/// `{{placeholder}}` expansion against the variable store
///
/// Unresolvable placeholders render as the empty string. Templated strings are
/// mostly user-facing chat messages, so a raw `{{...}}` token must never leak.

use crate::runtime::variables::{VarValue, VariableStore};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid"));

/// Expand every placeholder in `template` using the store
pub fn resolve<'a>(template: &'a str, store: &VariableStore) -> Cow<'a, str> {
    resolve_with(template, |path| store.lookup(path))
}

/// Expand placeholders with a custom lookup (used for per-item list rendering)
pub fn resolve_with<'a, F>(template: &'a str, lookup: F) -> Cow<'a, str>
where
    F: Fn(&str) -> VarValue,
{
    if !template.contains("{{") {
        return Cow::Borrowed(template);
    }
    PLACEHOLDER.replace_all(template, |caps: &Captures| lookup(&caps[1]).render())
}

/// Path of a string that is exactly one placeholder, e.g. `"{{productos}}"`
pub fn sole_placeholder(template: &str) -> Option<&str> {
    let caps = PLACEHOLDER.captures(template.trim())?;
    let whole = caps.get(0)?;
    if whole.as_str().len() == template.trim().len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Resolve every string inside a JSON parameter object.
///
/// A string that is a single placeholder keeps the referenced value's JSON type,
/// so `{"items": "{{carrito_items}}"}` yields an array rather than its text.
pub fn resolve_value(value: &Value, store: &VariableStore) -> Value {
    match value {
        Value::String(s) => match sole_placeholder(s) {
            Some(path) => match store.lookup(path) {
                VarValue::Set(v) => v,
                VarValue::Unset => Value::Null,
            },
            None => Value::String(resolve(s, store).into_owned()),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, store)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, store)))
                .collect(),
        ),
        other => other.clone(),
    }
}
