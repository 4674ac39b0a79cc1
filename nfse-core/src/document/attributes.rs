//! Loosely typed caller input and case-insensitive lookup into it.
use serde_json::{Map, Value};

use super::DocumentError;

/// Lower-case every object key, recursively (through arrays too).
///
/// Idempotent: applying it to its own output changes nothing. When two keys
/// differ only in case, the one that sorts last wins.
///
/// # Examples
/// ```rust
/// use nfse_core::document::canonicalize_keys;
/// use serde_json::json;
///
/// let value = canonicalize_keys(&json!({"infDPS": {"cLocEmi": "3550308"}}));
/// assert_eq!(value, json!({"infdps": {"clocemi": "3550308"}}));
/// ```
pub fn canonicalize_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.to_lowercase(), canonicalize_keys(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_keys).collect()),
        other => other.clone(),
    }
}

/// Cursor over a canonicalized tree that remembers its dotted path.
#[derive(Debug, Clone)]
pub(crate) struct Node<'a> {
    path: String,
    value: &'a Value,
}

impl<'a> Node<'a> {
    pub(crate) fn root(value: &'a Value) -> Result<Self, DocumentError> {
        if !value.is_object() {
            return Err(DocumentError::NotAnObject);
        }
        Ok(Self {
            path: String::new(),
            value,
        })
    }

    fn path_of(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.value
            .as_object()
            .and_then(|map| map.get(key))
            .filter(|value| !value.is_null())
    }

    /// Present and not null.
    pub(crate) fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn child(&self, key: &str) -> Option<Node<'a>> {
        self.get(key).map(|value| Node {
            path: self.path_of(key),
            value,
        })
    }

    pub(crate) fn require(&self, key: &str) -> Result<Node<'a>, DocumentError> {
        self.child(key).ok_or_else(|| DocumentError::Missing {
            path: self.path_of(key),
        })
    }

    /// Required scalar rendered as text.
    pub(crate) fn text(&self, key: &str) -> Result<String, DocumentError> {
        self.opt_text(key)?.ok_or_else(|| DocumentError::Missing {
            path: self.path_of(key),
        })
    }

    /// Optional scalar rendered as text; `null` counts as absent.
    pub(crate) fn opt_text(&self, key: &str) -> Result<Option<String>, DocumentError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => scalar_text(value)
                .map(Some)
                .ok_or_else(|| DocumentError::NotScalar {
                    path: self.path_of(key),
                }),
        }
    }

    /// Optional scalar that is dropped when empty.
    pub(crate) fn non_empty_text(&self, key: &str) -> Result<Option<String>, DocumentError> {
        Ok(self.opt_text(key)?.filter(|value| !value.is_empty()))
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}
