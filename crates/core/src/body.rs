//! Document bodies
//!
//! A body is a JSON object. Top-level keys beginning with `_` are reserved
//! for store metadata (`_id`, `_rev`, `_attachments`, ...) and are rejected
//! on local writes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object body of a revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentBody(Map<String, Value>);

impl DocumentBody {
    /// Wrap an existing JSON map
    pub fn new(map: Map<String, Value>) -> Self {
        DocumentBody(map)
    }

    /// Empty object `{}`, used for tombstones
    pub fn empty() -> Self {
        DocumentBody(Map::new())
    }

    /// Build a body from an arbitrary JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(DocumentBody(map)),
            other => Err(Error::InvalidBody(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Decode stored bytes. An empty slice decodes to `{}`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Encode for the `json` column
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Reject bodies carrying reserved `_` fields.
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = self.0.keys().find(|k| k.starts_with('_')) {
            return Err(Error::InvalidBody(format!(
                "field '{}' is reserved; top-level fields may not start with '_'",
                key
            )));
        }
        Ok(())
    }

    /// Field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// True for `{}`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for DocumentBody {
    fn from(map: Map<String, Value>) -> Self {
        DocumentBody(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_object() {
        let body = DocumentBody::from_value(json!({"a": 1})).unwrap();
        assert_eq!(body.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let err = DocumentBody::from_value(json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidBody(_)));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_bytes_round_trip() {
        let body = DocumentBody::from_value(json!({"name": "x", "n": [1, 2]})).unwrap();
        let bytes = body.to_bytes().unwrap();
        assert_eq!(DocumentBody::from_bytes(&bytes).unwrap(), body);
    }

    #[test]
    fn test_empty_bytes_decode_to_empty_body() {
        assert!(DocumentBody::from_bytes(b"").unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_reserved_fields() {
        let body = DocumentBody::from_value(json!({"_rev": "1-a", "x": 1})).unwrap();
        assert!(matches!(body.validate(), Err(Error::InvalidBody(_))));

        let ok = DocumentBody::from_value(json!({"x_": 1})).unwrap();
        assert!(ok.validate().is_ok());
    }
}
