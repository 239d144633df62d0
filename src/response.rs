//! Response envelope.
//!
//! An [`Envelope`] wraps one decoded HTTP exchange (or one parsed event of
//! a streamed response). When the body is a JSON object its top-level keys
//! are merged into the envelope's namespace next to the reserved
//! `status_code`, `body` and `headers` entries, so callers can read
//! `envelope["result"]` without digging into the body.

use crate::error::{ErnieError, ErnieResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Index;

/// Keys owned by the envelope itself.
pub const RESERVED_KEYS: [&str; 3] = ["status_code", "body", "headers"];

static NULL: Value = Value::Null;

/// Read-only view of a provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    status_code: u16,
    headers: BTreeMap<String, String>,
    body: Value,
    namespace: Map<String, Value>,
}

/// The reserved entries every namespace starts with.
fn base_namespace(status_code: u16, body: &Value, headers: &BTreeMap<String, String>) -> Map<String, Value> {
    let mut namespace = Map::new();
    namespace.insert("status_code".to_string(), Value::from(status_code));
    namespace.insert("body".to_string(), body.clone());
    namespace.insert(
        "headers".to_string(),
        Value::Object(
            headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    );
    namespace
}

impl Envelope {
    /// Build an envelope, merging an object body into the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::ReservedField`] if the body is an object with a
    /// top-level key named `status_code`, `body` or `headers`.
    pub fn new(
        status_code: u16,
        body: Value,
        headers: BTreeMap<String, String>,
    ) -> ErnieResult<Self> {
        let mut namespace = base_namespace(status_code, &body, &headers);
        if let Value::Object(fields) = &body {
            for (key, value) in fields {
                if RESERVED_KEYS.contains(&key.as_str()) {
                    return Err(ErnieError::reserved_field(key.clone()));
                }
                namespace.insert(key.clone(), value.clone());
            }
        }

        Ok(Self {
            status_code,
            headers,
            body,
            namespace,
        })
    }

    /// Envelope around a plain-text body.
    pub fn from_text(status_code: u16, text: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        let body = Value::String(text.into());
        let namespace = base_namespace(status_code, &body, &headers);
        Self {
            status_code,
            headers,
            body,
            namespace,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// Field by name, including the reserved entries.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.namespace.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.namespace.contains_key(key)
    }

    /// Deserialize one field into a concrete type.
    ///
    /// Missing fields deserialize from `null`, so `Option<T>` targets yield
    /// `None` rather than an error.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ErnieResult<T> {
        let value = self.namespace.get(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            ErnieError::response_parsing_error(format!("Field `{key}` has unexpected shape: {e}"))
        })
    }

    /// All keys, reserved ones included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.namespace.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.namespace.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Export as a plain map.
    ///
    /// A deep export contains every key, reserved entries included. A
    /// shallow export contains only the fields merged from the body.
    pub fn to_dict(&self, deep: bool) -> Map<String, Value> {
        if deep {
            self.namespace.clone()
        } else {
            self.namespace
                .iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
    }

    /// Export the full namespace as a JSON string.
    pub fn to_json(&self) -> String {
        Value::Object(self.namespace.clone()).to_string()
    }

    /// A new envelope with the same status and headers around `body`.
    pub fn with_body(&self, body: Value) -> ErnieResult<Self> {
        Self::new(self.status_code, body, self.headers.clone())
    }
}

impl Index<&str> for Envelope {
    type Output = Value;

    /// Missing keys index to `null`, mirroring `serde_json::Value`.
    fn index(&self, key: &str) -> &Value {
        self.namespace.get(key).unwrap_or(&NULL)
    }
}

impl<'a> IntoIterator for &'a Envelope {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.namespace.iter()
    }
}
