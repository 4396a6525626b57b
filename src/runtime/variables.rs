/// Per-conversation variable store
///
/// A flat namespace of JSON values written by node executors and read by the
/// template resolver and the condition evaluator. Reads never fail: a missing
/// name (or a JSON `null`) resolves to [`VarValue::Unset`].

use crate::error::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Inbound message text, written on every inbound event
pub const MESSAGE_VAR: &str = "mensaje_usuario";
/// Counterparty phone number
pub const SENDER_VAR: &str = "telefono_usuario";
/// RFC 3339 timestamp of the inbound event
pub const TIMESTAMP_VAR: &str = "timestamp_mensaje";

/// Result of reading a variable
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VarValue {
    /// Never written, explicitly cleared, or JSON null
    #[default]
    Unset,
    Set(Value),
}

impl VarValue {
    pub fn is_set(&self) -> bool {
        matches!(self, VarValue::Set(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            VarValue::Set(v) => Some(v),
            VarValue::Unset => None,
        }
    }

    /// Text form used by templates and string comparisons. Unset renders as "".
    pub fn render(&self) -> String {
        match self {
            VarValue::Unset => String::new(),
            VarValue::Set(Value::String(s)) => s.clone(),
            VarValue::Set(Value::Null) => String::new(),
            VarValue::Set(other) => other.to_string(),
        }
    }

    /// Numeric view; numeric strings are accepted, anything else is None.
    /// "NaN" and infinities are not numbers.
    pub fn as_number(&self) -> Option<f64> {
        let number = match self {
            VarValue::Set(Value::Number(n)) => n.as_f64(),
            VarValue::Set(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|n| n.is_finite())
    }

    /// Unset, blank strings, empty arrays and empty objects are empty.
    pub fn is_empty(&self) -> bool {
        match self {
            VarValue::Unset => true,
            VarValue::Set(Value::Null) => true,
            VarValue::Set(Value::String(s)) => s.trim().is_empty(),
            VarValue::Set(Value::Array(a)) => a.is_empty(),
            VarValue::Set(Value::Object(o)) => o.is_empty(),
            VarValue::Set(_) => false,
        }
    }
}

impl From<Value> for VarValue {
    fn from(value: Value) -> Self {
        if value.is_null() {
            VarValue::Unset
        } else {
            VarValue::Set(value)
        }
    }
}

impl From<Option<Value>> for VarValue {
    fn from(value: Option<Value>) -> Self {
        value.map(VarValue::from).unwrap_or_default()
    }
}

/// Flat variable namespace, persisted as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStore {
    values: BTreeMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-name read
    pub fn get(&self, name: &str) -> VarValue {
        self.values.get(name).cloned().into()
    }

    /// Writes the value as-is. Writing `Unset` (or null) removes the name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        let name = name.into();
        match value.into() {
            VarValue::Set(v) => {
                self.values.insert(name, v);
            }
            VarValue::Unset => {
                self.values.remove(&name);
            }
        }
    }

    pub fn merge(&mut self, partial: Map<String, Value>) {
        for (name, value) in partial {
            self.set(name, value);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Resolve a possibly dotted path.
    ///
    /// A literal variable with the full dotted name wins (node-scoped outputs
    /// such as `gpt-1.respuesta_gpt`). Otherwise the longest prefix that names
    /// a variable is used and the remaining segments index into it.
    pub fn lookup(&self, path: &str) -> VarValue {
        let path = path.trim();
        if let Some(v) = self.values.get(path) {
            return v.clone().into();
        }

        let segments: Vec<&str> = path.split('.').collect();
        for split in (1..segments.len()).rev() {
            let head = segments[..split].join(".");
            if let Some(root) = self.values.get(&head) {
                return walk_path(root, &segments[split..]);
            }
        }
        VarValue::Unset
    }
}

fn walk_path(root: &Value, segments: &[&str]) -> VarValue {
    let mut current = root.clone();
    for segment in segments {
        let next = match &current {
            Value::Object(map) => match map.get(*segment) {
                Some(v) => Some(v.clone()),
                None if is_size_segment(segment) => Some(Value::from(map.len())),
                None => None,
            },
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(index) => items.get(index).cloned(),
                Err(_) if is_size_segment(segment) => Some(Value::from(items.len())),
                Err(_) => None,
            },
            Value::String(s) if is_size_segment(segment) => {
                Some(Value::from(s.chars().count()))
            }
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return VarValue::Unset,
        }
    }
    current.into()
}

fn is_size_segment(segment: &str) -> bool {
    segment == "length" || segment == "count"
}

/// Declared shape of a flow-global variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl VariableKind {
    pub fn name(&self) -> &'static str {
        match self {
            VariableKind::Any => "any value",
            VariableKind::String => "a string",
            VariableKind::Number => "a number",
            VariableKind::Boolean => "a boolean",
            VariableKind::Array => "an array",
            VariableKind::Object => "an object",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            VariableKind::Any => true,
            VariableKind::String => value.is_string(),
            VariableKind::Number => value.is_number(),
            VariableKind::Boolean => value.is_boolean(),
            VariableKind::Array => value.is_array(),
            VariableKind::Object => value.is_object(),
        }
    }

    /// Lossless conversion from text, used when model output arrives as strings
    pub fn coerce(&self, value: Value) -> Value {
        match (self, &value) {
            (VariableKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(value),
            (VariableKind::Boolean, Value::String(s)) => match s.trim() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => value,
            },
            (VariableKind::String, Value::Number(n)) => Value::String(n.to_string()),
            _ => value,
        }
    }
}

pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Declared variable kinds of one flow, checked on every write batch
#[derive(Debug, Clone, Default)]
pub struct VariableSchema {
    kinds: HashMap<String, VariableKind>,
}

impl VariableSchema {
    pub fn new(kinds: HashMap<String, VariableKind>) -> Self {
        Self { kinds }
    }

    pub fn kind_of(&self, name: &str) -> VariableKind {
        self.kinds.get(name).copied().unwrap_or_default()
    }

    pub fn check(&self, name: &str, value: &VarValue) -> Result<(), NodeError> {
        let VarValue::Set(v) = value else {
            return Ok(());
        };
        let kind = self.kind_of(name);
        if kind.accepts(v) {
            Ok(())
        } else {
            Err(NodeError::VariableType {
                name: name.to_string(),
                expected: kind.name().to_string(),
                found: describe(v).to_string(),
            })
        }
    }
}
