//! Fabricated resources and their stored encodings

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Body of a fabricated resource.
///
/// Object bodies are merge-mutable; everything else is read-only once
/// materialized. Binary model output is carried as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceBody {
    /// Structured JSON object, eligible for field-safe merges
    Object(Map<String, Value>),
    /// Freeform text (plain, HTML, or stringified binary)
    Text(String),
}

impl ResourceBody {
    /// Stored encoding: objects as JSON text, text as-is.
    pub fn encode(&self) -> String {
        match self {
            ResourceBody::Object(map) => Value::Object(map.clone()).to_string(),
            ResourceBody::Text(text) => text.clone(),
        }
    }

    /// Best-effort decode of a stored value. JSON objects come back
    /// structured, the literal string `"None"` decodes to no body, and
    /// anything that fails to parse falls back to raw text.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(ResourceBody::Object(map)),
            Ok(Value::Null) => None,
            Ok(Value::String(text)) if text == "None" => None,
            Ok(Value::String(text)) => Some(ResourceBody::Text(text)),
            _ => Some(ResourceBody::Text(raw.to_string())),
        }
    }

    /// Encode an optional body; absent stays absent.
    pub fn encode_opt(body: Option<&ResourceBody>) -> Option<String> {
        body.map(ResourceBody::encode)
    }

    /// Decode an optional stored value.
    pub fn decode_opt(raw: Option<&str>) -> Option<Self> {
        raw.and_then(ResourceBody::decode)
    }
}

/// A persisted fabricated resource: one row per logical endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FabricatedResource {
    pub id: i64,
    pub canonical_key: Option<String>,
    pub path: Option<String>,
    pub body: Option<ResourceBody>,
    pub status: u16,
    /// Sanitized header set: transport-controlled names stripped, values
    /// coerced to strings.
    pub headers: BTreeMap<String, String>,
}

/// A resource awaiting its store-assigned id. The resource row and its
/// embedding row must persist together.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub canonical_key: Option<String>,
    pub path: Option<String>,
    pub body: Option<ResourceBody>,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub embedding: Option<Vec<f32>>,
}

/// Stored encoding for a header map (JSON text).
pub fn encode_headers(headers: &BTreeMap<String, String>) -> String {
    let map: Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map).to_string()
}

/// Decode a stored header map, coercing non-string values.
pub fn decode_headers(raw: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}
