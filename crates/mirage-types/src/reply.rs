//! Model reply parsing
//!
//! Generative collaborators return `{body, status_code, headers}` as JSON,
//! frequently wrapped in markdown code fences. Parsing is tolerant by
//! design: anything that survives fence-stripping but still fails to parse
//! becomes a plain-text 200 rather than a failed request.

use crate::resource::ResourceBody;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use uuid::Uuid;

static DEFAULT_HEADERS: LazyLock<BTreeMap<String, String>> = LazyLock::new(|| {
    let mut headers = BTreeMap::new();
    headers.insert("Server".to_string(), "nginx/1.22.1".to_string());
    headers.insert("X-Request-ID".to_string(), Uuid::new_v4().to_string());
    headers.insert("X-Trace-ID".to_string(), Uuid::new_v4().to_string());
    headers.insert("X-Response-Time".to_string(), "auto".to_string());
    headers.insert(
        "Date".to_string(),
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
    );
    headers.insert("Cache-Control".to_string(), "no-cache".to_string());
    headers.insert("Vary".to_string(), "Accept-Encoding".to_string());
    headers
});

/// The default honeypot header set. Computed once per process so replays of
/// the same resource stay byte-identical.
pub fn default_headers() -> &'static BTreeMap<String, String> {
    &DEFAULT_HEADERS
}

/// A parsed generative reply, pre-sanitation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub body: Option<ResourceBody>,
    pub status: u16,
    /// Raw fabricated headers; values may be any JSON type until sanitized.
    pub headers: Map<String, Value>,
}

impl ModelReply {
    /// Parse raw model output. Strips code fences, expects
    /// `{body, status_code, headers}`, and degrades to a plain-text 200
    /// when the output is not structured.
    pub fn parse(raw: &str) -> Self {
        let text = strip_fences(raw);

        let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(&text) else {
            return Self::plain_text(&text);
        };

        let body = match parsed.get("body") {
            Some(Value::Object(map)) => Some(ResourceBody::Object(map.clone())),
            Some(Value::String(inner)) => {
                let inner = strip_fences(inner).replace(['\r', '\n'], "");
                Some(ResourceBody::Text(inner))
            }
            Some(Value::Null) | None => None,
            Some(other) => Some(ResourceBody::Text(other.to_string())),
        };

        let status = parsed
            .get("status_code")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(200);

        let headers = match parsed.get("headers") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k.clone(), Value::String(s.trim().to_string())),
                    other => (k.clone(), other.clone()),
                })
                .collect(),
            _ => Map::new(),
        };

        Self {
            body,
            status,
            headers,
        }
    }

    fn plain_text(text: &str) -> Self {
        Self {
            body: Some(ResourceBody::Text(text.replace(['\r', '\n'], ""))),
            status: 200,
            headers: Map::new(),
        }
    }
}

/// Drop a leading ```lang line and a trailing ``` marker, if present.
fn strip_fences(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        match text.find('\n') {
            Some(nl) => text = text[nl + 1..].trim_start(),
            None => text = text.trim_start_matches('`'),
        }
    }
    if text.ends_with("```") {
        text = text[..text.len() - 3].trim_end();
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_reply() {
        let reply = ModelReply::parse(
            r#"{"body": {"id": 1}, "status_code": 201, "headers": {"X-Api": " v2 "}}"#,
        );
        assert_eq!(reply.status, 201);
        assert!(matches!(reply.body, Some(ResourceBody::Object(_))));
        assert_eq!(
            reply.headers.get("X-Api"),
            Some(&Value::String("v2".to_string()))
        );
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"body\": {\"ok\": true}, \"status_code\": 200, \"headers\": {}}\n```";
        let reply = ModelReply::parse(raw);
        assert!(matches!(reply.body, Some(ResourceBody::Object(_))));
    }

    #[test]
    fn fenced_string_body_is_flattened() {
        let raw = r#"{"body": "```html\n<html><body>ok</body></html>\n```", "status_code": 200, "headers": {}}"#;
        let reply = ModelReply::parse(raw);
        assert_eq!(
            reply.body,
            Some(ResourceBody::Text("<html><body>ok</body></html>".to_string()))
        );
    }

    #[test]
    fn unstructured_output_degrades_to_plain_text() {
        let reply = ModelReply::parse("I could not\nproduce JSON today");
        assert_eq!(reply.status, 200);
        assert_eq!(
            reply.body,
            Some(ResourceBody::Text("I could notproduce JSON today".to_string()))
        );
        assert!(reply.headers.is_empty());
    }

    #[test]
    fn default_headers_are_stable_within_a_process() {
        assert_eq!(default_headers(), default_headers());
        assert_eq!(
            default_headers().get("Server").map(String::as_str),
            Some("nginx/1.22.1")
        );
    }
}
