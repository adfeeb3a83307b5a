//! Response synthesis
//!
//! Composes a generation prompt from the request, the matched attack
//! template, and the catalog side-tables, then parses the collaborator's
//! output into a structured reply. The trait seam lets engine tests run
//! against a scripted synthesizer instead of a live model.

mod client;

pub use client::{ModelClient, ModelError};

use async_trait::async_trait;
use mirage_types::{catalog::build_haystack, AttackCatalog, InboundRequest, ModelReply};
use serde_json::Value;

/// Prompt templates loaded once at startup.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    /// System prompt sent with every generation
    pub system: String,
    /// User prompt with `{{placeholder}}` slots
    pub augment: String,
}

/// The synthesis seam the engine depends on.
#[async_trait]
pub trait ResponseSynthesizer: Send + Sync {
    /// Fabricate a response for a previously unseen logical endpoint.
    async fn fabricate(&self, request: &InboundRequest) -> Result<ModelReply, ModelError>;

    /// Embed a semantic key for similarity lookup.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

/// Model-backed synthesizer: catalog + templates + collaborator client.
pub struct ModelSynthesizer {
    client: ModelClient,
    catalog: AttackCatalog,
    templates: PromptTemplates,
}

impl ModelSynthesizer {
    pub fn new(client: ModelClient, catalog: AttackCatalog, templates: PromptTemplates) -> Self {
        Self {
            client,
            catalog,
            templates,
        }
    }

    /// Fill the augment template for one request. The attack section is
    /// present only on a positive signature match; both side-tables are
    /// included verbatim on every prompt.
    fn compose_prompt(&self, request: &InboundRequest) -> String {
        let attack_section = match self.catalog.match_request(request) {
            Some(signature) => format!(
                "ATTACK_TYPE: {}\nATTACK_BEHAVIOR:\n{}\n",
                signature.key, signature.template
            ),
            None => String::new(),
        };

        let dynamic_fields_section = if self.catalog.dynamic_fields.is_empty() {
            String::new()
        } else {
            format!(
                "DYNAMIC_FIELDS (use for realism):\n{}\n",
                Value::Object(self.catalog.dynamic_fields.clone())
            )
        };

        let emulated_files_section = if self.catalog.emulated_files.is_empty() {
            String::new()
        } else {
            format!(
                "EMULATED_FILES (you may leak partial fragments if attack type allows it):\n{}\n",
                Value::Object(self.catalog.emulated_files.clone())
            )
        };

        let headers = serde_json::to_string(&request.headers).unwrap_or_default();
        let body = request
            .body
            .as_ref()
            .map(|b| Value::Object(b.as_object()).to_string())
            .unwrap_or_else(|| "null".to_string());
        let query = build_query_json(request);

        self.templates
            .augment
            .replace("{{method}}", &request.method)
            .replace("{{headers}}", &headers)
            .replace("{{path}}", &request.full_path)
            .replace("{{body}}", &body)
            .replace("{{query_params}}", &query)
            .replace("{{attack_section}}", &attack_section)
            .replace("{{dynamic_fields_section}}", &dynamic_fields_section)
            .replace("{{emulated_files_section}}", &emulated_files_section)
    }
}

fn build_query_json(request: &InboundRequest) -> String {
    let map: serde_json::Map<String, Value> = request
        .query_params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map).to_string()
}

#[async_trait]
impl ResponseSynthesizer for ModelSynthesizer {
    async fn fabricate(&self, request: &InboundRequest) -> Result<ModelReply, ModelError> {
        let prompt = self.compose_prompt(request);

        tracing::debug!(
            path = %request.full_path,
            haystack = %build_haystack(request),
            "fabricating response"
        );

        let raw = self.client.chat(&self.templates.system, &prompt).await?;
        Ok(ModelReply::parse(&raw))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.client.embed(text).await
    }
}
