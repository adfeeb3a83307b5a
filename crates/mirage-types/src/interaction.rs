//! Append-only interaction records
//!
//! One record per terminal outcome. The engine only ever writes these;
//! nothing in the resolution path reads them back.

use crate::request::InboundRequest;
use crate::resource::{encode_headers, ResourceBody};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single audit row, flattened to storable text fields.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub query_json: String,
    pub semantic_key: String,
    pub headers_json: String,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub response_status: u16,
    pub response_headers: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl InteractionRecord {
    /// Capture a request/outcome pair.
    pub fn new(
        request: &InboundRequest,
        response_body: Option<&ResourceBody>,
        response_status: u16,
        response_headers: &BTreeMap<String, String>,
    ) -> Self {
        let query: Map<String, Value> = request
            .query_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let headers: Map<String, Value> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        Self {
            client_ip: request.client_ip.clone(),
            method: request.method.clone(),
            path: request.full_path.clone(),
            query_json: Value::Object(query).to_string(),
            semantic_key: request.semantic_key(),
            headers_json: Value::Object(headers).to_string(),
            request_body: request
                .body
                .as_ref()
                .map(|b| Value::Object(b.as_object()).to_string()),
            response_body: ResourceBody::encode_opt(response_body),
            response_status,
            response_headers: Some(encode_headers(response_headers)),
            requested_at: request.received_at,
        }
    }
}
