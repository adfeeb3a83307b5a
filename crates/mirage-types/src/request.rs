//! Inbound request identity and path validation
//!
//! Every request is reduced to three derived identities:
//! - `fingerprint`: exact identity, keys the fabrication gate
//! - `semantic_key`: textual summary embedded into vector space
//! - `canonical_signature`: query-order-independent secondary identity

use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Loose UUIDv4: 32 hex digits grouped 8-4-4-4-12, hyphens optional,
/// version nibble fixed to 4, variant nibble in {8,9,a,b}.
static UUID_V4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-?[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-?[0-9a-f]{12}$")
        .expect("uuid pattern")
});

static API_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^v[1-3]$").expect("version pattern"));

/// Maximum non-empty path segments accepted before the request is dropped.
pub const MAX_PATH_SEGMENTS: usize = 5;

/// Path validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Too deep to be a plausible API path; answered with an empty response.
    #[error("path has too many segments")]
    TooManySegments,

    /// Segment matched none of the accepted shapes.
    #[error("Segment '{0}' must be a valid UUID v4 for resource identifiers.")]
    InvalidSegment(String),
}

/// Request body, resolved once at extraction time by best-effort decode:
/// JSON object first, UTF-8 text second, raw bytes as base64 last.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Structured JSON object
    Json(Map<String, Value>),
    /// Plain text
    Text(String),
    /// Undecodable bytes, carried as base64 plus original size
    Binary { base64: String, size: usize },
}

impl RequestBody {
    /// Decode raw bytes into the best-fitting variant. Empty input is no body.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(raw) {
            return Some(RequestBody::Json(map));
        }

        if let Ok(text) = std::str::from_utf8(raw) {
            return Some(RequestBody::Text(text.to_string()));
        }

        Some(RequestBody::Binary {
            base64: base64::engine::general_purpose::STANDARD.encode(raw),
            size: raw.len(),
        })
    }

    /// Render the body as a flat object, the shape used for fingerprints,
    /// semantic keys, and merge candidates.
    pub fn as_object(&self) -> Map<String, Value> {
        match self {
            RequestBody::Json(map) => map.clone(),
            RequestBody::Text(text) => {
                let mut map = Map::new();
                map.insert("_text".to_string(), Value::String(text.clone()));
                map
            }
            RequestBody::Binary { base64, size } => {
                let mut map = Map::new();
                map.insert("_binary_base64".to_string(), Value::String(base64.clone()));
                map.insert("_size".to_string(), Value::from(*size));
                map
            }
        }
    }
}

/// A validated inbound request. Immutable after construction.
#[derive(Debug, Clone, Serialize)]
pub struct InboundRequest {
    pub client_ip: String,
    pub method: String,
    pub full_path: String,
    /// Query pairs in arrival order; ordering matters for the fingerprint
    /// but not for the canonical signature.
    pub query_params: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub headers: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl InboundRequest {
    /// Build a request, rejecting structurally implausible paths up front.
    pub fn new(
        client_ip: impl Into<String>,
        method: impl Into<String>,
        full_path: impl Into<String>,
        query_params: Vec<(String, String)>,
        body: Option<RequestBody>,
        headers: BTreeMap<String, String>,
    ) -> Result<Self, PathError> {
        let full_path = full_path.into();
        validate_path(&full_path)?;

        Ok(Self {
            client_ip: client_ip.into(),
            method: method.into(),
            full_path,
            query_params,
            body,
            headers,
            received_at: Utc::now(),
        })
    }

    /// Exact request identity: sha256 over method, path, arrival-order query,
    /// and body. Keys the fabrication gate.
    pub fn fingerprint(&self) -> String {
        let query = self
            .query_params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let raw = format!(
            "{}:{}:{}:{}",
            self.method,
            self.full_path,
            query,
            self.body_json()
        );

        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Textual request summary fed to the embedding collaborator.
    pub fn semantic_key(&self) -> String {
        format!(
            "{} {} {} {}",
            self.method,
            self.full_path,
            self.query_json(),
            self.body_json()
        )
    }

    /// Query-order-independent identity: `verb:path` plus the query pairs
    /// sorted by key when any are present.
    pub fn canonical_signature(&self, verb: &str) -> String {
        if self.query_params.is_empty() {
            return format!("{}:{}", verb, self.full_path);
        }

        let mut pairs: Vec<_> = self
            .query_params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        pairs.sort();

        format!("{}:{}?{}", verb, self.full_path, pairs.join("&"))
    }

    fn query_json(&self) -> String {
        let map: Map<String, Value> = self
            .query_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map).to_string()
    }

    fn body_json(&self) -> String {
        match &self.body {
            Some(body) => Value::Object(body.as_object()).to_string(),
            None => "null".to_string(),
        }
    }
}

/// Validate a request path: at most [`MAX_PATH_SEGMENTS`] non-empty segments,
/// each an API version token, alphabetic, alphanumeric, or a loose UUIDv4.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.len() > MAX_PATH_SEGMENTS {
        return Err(PathError::TooManySegments);
    }

    for segment in segments {
        if API_VERSION_RE.is_match(segment) {
            continue;
        }
        if segment.chars().all(|c| c.is_ascii_alphanumeric()) {
            continue;
        }
        if !UUID_V4_RE.is_match(segment) {
            return Err(PathError::InvalidSegment(segment.to_string()));
        }
    }

    Ok(())
}
