//! Response framing
//!
//! Fabricated header sets pass through sanitation before they are served or
//! persisted: transport-controlled names are stripped and values coerced to
//! strings. The body picks its own framing — JSON for objects, HTML for
//! markup, plain text otherwise.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mirage_types::{default_headers, ResourceBody};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Header names the transport owns; fabricated values for these are dropped.
const FORBIDDEN_HEADERS: [&str; 5] = [
    "content-length",
    "transfer-encoding",
    "date",
    "content-type",
    "server",
];

/// Strip transport-controlled names and coerce the rest to strings.
pub fn sanitize_headers(raw: &Map<String, Value>) -> BTreeMap<String, String> {
    raw.iter()
        .filter(|(name, _)| !FORBIDDEN_HEADERS.contains(&name.to_lowercase().as_str()))
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Merge a sanitized fabricated header set over the default honeypot set.
/// The fabricated set is re-filtered so stale stored rows cannot smuggle a
/// transport header back in.
pub fn merged_headers(fabricated: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = default_headers().clone();
    for (name, value) in fabricated {
        if FORBIDDEN_HEADERS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Frame a resolved outcome as an HTTP response.
pub fn frame(body: Option<&ResourceBody>, status: u16, headers: &BTreeMap<String, String>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let merged = merged_headers(headers);

    let (content_type, payload) = match body {
        None => (None, String::new()),
        Some(ResourceBody::Object(map)) => (
            Some("application/json"),
            Value::Object(map.clone()).to_string(),
        ),
        Some(ResourceBody::Text(text)) if text.to_lowercase().contains("<html") => {
            (Some("text/html; charset=utf-8"), text.clone())
        }
        Some(ResourceBody::Text(text)) => (Some("text/plain; charset=utf-8"), text.clone()),
    };

    let mut response = if status == StatusCode::NO_CONTENT {
        status.into_response()
    } else {
        (status, payload).into_response()
    };

    let response_headers = response.headers_mut();
    if status != StatusCode::NO_CONTENT {
        if let Some(content_type) = content_type {
            response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }

    for (name, value) in &merged {
        let Ok(name) = HeaderName::try_from(name.as_str()) else {
            continue;
        };
        let Ok(value) = HeaderValue::try_from(value.as_str()) else {
            continue;
        };
        response_headers.insert(name, value);
    }

    response
}
