//! Attack-signature catalog
//!
//! Loaded once at startup and injected as an immutable value. Each entry
//! maps a set of patterns to a behavioral template that biases fabricated
//! content toward a vulnerability class. Two side-tables ride along:
//! `dynamic_fields` and `emulated_files`, applied to every prompt.

use crate::request::InboundRequest;
use serde_json::{Map, Value};

/// Catalog keys that are not attack signatures.
const RESERVED_KEYS: [&str; 3] = ["dynamic_fields", "emulated_files", "fallback"];

/// One catalog entry: patterns scored by substring, template applied on win.
#[derive(Debug, Clone)]
pub struct AttackSignature {
    pub key: String,
    pub patterns: Vec<String>,
    pub template: String,
}

/// The startup-loaded catalog: signatures plus the two side-tables.
#[derive(Debug, Clone, Default)]
pub struct AttackCatalog {
    signatures: Vec<AttackSignature>,
    pub dynamic_fields: Map<String, Value>,
    pub emulated_files: Map<String, Value>,
}

impl AttackCatalog {
    /// A catalog with no signatures and empty side-tables. The synthesizer
    /// still works against it; prompts just carry no attack bias.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a catalog from its JSON document. Entries that are not objects
    /// with `patterns` and `template` are skipped; reserved keys feed the
    /// side-tables instead.
    pub fn from_json(document: &Value) -> Self {
        let Value::Object(root) = document else {
            return Self::empty();
        };

        let dynamic_fields = match root.get("dynamic_fields") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let emulated_files = match root.get("emulated_files").and_then(|v| v.get("files")) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let mut signatures = Vec::new();
        for (key, entry) in root {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Value::Object(entry) = entry else {
                continue;
            };
            let Some(Value::Array(patterns)) = entry.get("patterns") else {
                continue;
            };
            let Some(Value::String(template)) = entry.get("template") else {
                continue;
            };

            signatures.push(AttackSignature {
                key: key.clone(),
                patterns: patterns
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                template: template.clone(),
            });
        }

        Self {
            signatures,
            dynamic_fields,
            emulated_files,
        }
    }

    pub fn signatures(&self) -> &[AttackSignature] {
        &self.signatures
    }

    /// Select the strictly-highest-scoring signature for this request.
    ///
    /// Score = number of patterns found as substrings of the lowercased
    /// method+path+query+body haystack. Ties keep the earlier entry; no
    /// positive score selects nothing.
    pub fn match_request(&self, request: &InboundRequest) -> Option<&AttackSignature> {
        let haystack = build_haystack(request);

        let mut best: Option<&AttackSignature> = None;
        let mut best_score = 0usize;

        for signature in &self.signatures {
            let score = signature
                .patterns
                .iter()
                .filter(|p| haystack.contains(&p.to_lowercase()))
                .count();

            if score > best_score {
                best_score = score;
                best = Some(signature);
            }
        }

        best
    }
}

/// Lowercased scoring haystack for a request.
pub fn build_haystack(request: &InboundRequest) -> String {
    let query: Map<String, Value> = request
        .query_params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let body = request
        .body
        .as_ref()
        .map(|b| Value::Object(b.as_object()).to_string())
        .unwrap_or_default();

    format!(
        "{} {} {} {}",
        request.method,
        request.full_path,
        Value::Object(query),
        body
    )
    .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn catalog() -> AttackCatalog {
        AttackCatalog::from_json(&json!({
            "sql_injection": {
                "patterns": ["union select", "' or 1=1", "sqlmap"],
                "template": "Leak a fake table listing."
            },
            "path_traversal": {
                "patterns": ["../", "etc/passwd"],
                "template": "Pretend the file exists."
            },
            "dynamic_fields": {"hostname": "db-prod-03"},
            "emulated_files": {"files": {"/etc/passwd": "root:x:0:0::/root:/bin/bash"}},
            "fallback": {"patterns": [], "template": "ignored"}
        }))
    }

    fn get(path: &str, query: Vec<(&str, &str)>) -> InboundRequest {
        InboundRequest::new(
            "10.0.0.1",
            "GET",
            path,
            query
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            None,
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn reserved_keys_are_not_signatures() {
        let catalog = catalog();
        assert_eq!(catalog.signatures().len(), 2);
        assert_eq!(
            catalog.dynamic_fields.get("hostname"),
            Some(&json!("db-prod-03"))
        );
        assert!(catalog.emulated_files.contains_key("/etc/passwd"));
    }

    #[test]
    fn highest_scoring_signature_wins() {
        let catalog = catalog();
        let req = get("/search", vec![("q", "UNION SELECT * FROM users' OR 1=1")]);
        let matched = catalog.match_request(&req).unwrap();
        assert_eq!(matched.key, "sql_injection");
    }

    #[test]
    fn no_positive_score_selects_nothing() {
        let catalog = catalog();
        let req = get("/health", vec![]);
        assert!(catalog.match_request(&req).is_none());
    }

    #[test]
    fn body_participates_in_scoring() {
        let catalog = catalog();
        let body = RequestBody::from_bytes(br#"{"file": "../../etc/passwd"}"#);
        let req = InboundRequest::new(
            "10.0.0.1",
            "POST",
            "/upload",
            vec![],
            body,
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(catalog.match_request(&req).unwrap().key, "path_traversal");
    }

    #[test]
    fn ties_keep_the_earlier_entry() {
        let catalog = AttackCatalog::from_json(&json!({
            "a_first": {"patterns": ["probe"], "template": "a"},
            "b_second": {"patterns": ["probe"], "template": "b"}
        }));
        let req = get("/probe", vec![]);
        assert_eq!(catalog.match_request(&req).unwrap().key, "a_first");
    }
}
