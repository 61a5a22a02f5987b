//! Conversion between plain JSON and Firestore's typed value encoding.
//!
//! Firestore wraps every value in a single-key object naming its type
//! (`{"stringValue": "x"}`, `{"integerValue": "3"}`, ...). Entities are
//! serialized with serde to plain JSON first and then wrapped here, and
//! documents coming back are unwrapped and deserialized into typed models.
//! This is the one place untyped data from the database enters the crate.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::store::StoreError;

/// A document as returned by the REST API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of the document name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Wrap a plain JSON value in Firestore's encoding.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_map(map) } }),
    }
}

pub fn encode_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Unwrap a Firestore-encoded value into plain JSON.
pub fn decode_value(value: &Value) -> Result<Value, StoreError> {
    let object = value
        .as_object()
        .ok_or_else(|| StoreError::InvalidDocument(format!("expected typed value, got {}", value)))?;
    let (kind, inner) = object
        .iter()
        .next()
        .ok_or_else(|| StoreError::InvalidDocument("empty typed value".to_string()))?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "doubleValue" => Ok(inner.clone()),
        "stringValue" | "timestampValue" | "referenceValue" => Ok(inner.clone()),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed
                .map(|i| Value::Number(Number::from(i)))
                .ok_or_else(|| StoreError::InvalidDocument(format!("bad integerValue {}", inner)))
        }
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(values))
        }
        "mapValue" => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Ok(Value::Object(decode_map(&fields)?))
        }
        other => Err(StoreError::InvalidDocument(format!(
            "unsupported value type {}",
            other
        ))),
    }
}

pub fn decode_map(fields: &Map<String, Value>) -> Result<Map<String, Value>, StoreError> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect()
}

/// Encode an entity's fields, leaving out `id` (it lives in the document name).
pub fn encode_entity<T: Serialize>(entity: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(entity)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(encode_map(&map))
        }
        other => Err(StoreError::InvalidDocument(format!(
            "entity did not serialize to an object: {}",
            other
        ))),
    }
}

/// Decode a document into a typed entity, restoring `id` from its name.
pub fn decode_document<T: DeserializeOwned>(document: &Document) -> Result<T, StoreError> {
    let mut map = decode_map(&document.fields)
        .map_err(|e| StoreError::InvalidDocument(format!("{}: {}", document.name, e)))?;
    map.insert("id".to_string(), Value::String(document.id().to_string()));
    serde_json::from_value(Value::Object(map))
        .map_err(|e| StoreError::InvalidDocument(format!("{}: {}", document.name, e)))
}
