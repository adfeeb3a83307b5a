//! Resolution engine
//!
//! One pass per request: take the fabrication gate, walk the lookup chain
//! (exact path, then canonical signature, then vector similarity), and on a
//! full miss either rate-limit the exploration or fabricate, persist, and
//! replay. Mutations merge into object-bodied hits under field-safety rules;
//! everything else replays unchanged. Every terminal outcome writes exactly
//! one interaction record — gate collisions write none.

use crate::error::{ApiError, ApiResult};
use crate::framing::sanitize_headers;
use crate::gate::{FabricationGate, GateError};
use crate::ratelimit::{ExplorationLimiter, LimiterError, RateDecision};
use crate::storage::Storage;
use crate::synth::{ModelError, ResponseSynthesizer};
use mirage_types::{
    default_headers, FabricatedResource, InboundRequest, InteractionRecord, NewResource,
    ResourceBody,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A resolved outcome ready for framing.
#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub body: Option<ResourceBody>,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
}

impl Served {
    fn from_resource(resource: &FabricatedResource) -> Self {
        Self {
            body: resource.body.clone(),
            status: resource.status,
            headers: resource.headers.clone(),
        }
    }
}

/// Lookup leftovers a fabrication reuses: the canonical signature and the
/// embedding are computed at most once per request.
#[derive(Debug, Default)]
struct FabricationContext {
    canonical: Option<String>,
    embedding: Option<Vec<f32>>,
}

/// The per-request orchestrator.
pub struct ResolutionEngine {
    storage: Arc<dyn Storage>,
    gate: Arc<dyn FabricationGate>,
    limiter: Arc<dyn ExplorationLimiter>,
    synthesizer: Arc<dyn ResponseSynthesizer>,
    vector_threshold: f32,
}

impl ResolutionEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        gate: Arc<dyn FabricationGate>,
        limiter: Arc<dyn ExplorationLimiter>,
        synthesizer: Arc<dyn ResponseSynthesizer>,
        vector_threshold: f32,
    ) -> Self {
        Self {
            storage,
            gate,
            limiter,
            synthesizer,
            vector_threshold,
        }
    }

    /// Resolve or fabricate for a GET.
    pub async fn resolve_get(&self, request: &InboundRequest) -> ApiResult<Served> {
        let fingerprint = request.fingerprint();
        if !self.gate.acquire(&fingerprint).await? {
            return Err(ApiError::LockContended);
        }

        let outcome = self.get_inner(request).await;
        self.release_gate(&fingerprint).await;
        outcome
    }

    /// Resolve a mutating verb: merge into object-bodied hits, echo
    /// freeform hits, fabricate on a full miss.
    pub async fn resolve_mutation(
        &self,
        request: &InboundRequest,
        authenticated: bool,
    ) -> ApiResult<Served> {
        let fingerprint = request.fingerprint();
        if !self.gate.acquire(&fingerprint).await? {
            return Err(ApiError::LockContended);
        }

        let outcome = self.mutate_inner(request, authenticated).await;
        self.release_gate(&fingerprint).await;
        outcome
    }

    /// DELETE never consults the store: record a 204 and pretend.
    pub async fn resolve_delete(&self, request: &InboundRequest) -> ApiResult<Served> {
        self.audit(request, None, 204, default_headers()).await?;
        Ok(Served {
            body: None,
            status: 204,
            headers: default_headers().clone(),
        })
    }

    async fn get_inner(&self, request: &InboundRequest) -> ApiResult<Served> {
        let (resource, context) = self.lookup(request).await?;

        if let Some(resource) = resource {
            return self.replay(request, &resource).await;
        }

        match self.limiter.check(&request.client_ip).await? {
            RateDecision::Limited { retry_after } => {
                let mut denial = Map::new();
                denial.insert(
                    "error".to_string(),
                    Value::String("Rate limit exceeded. Try again later.".to_string()),
                );
                denial.insert("retry_after".to_string(), Value::from(retry_after));
                self.audit(
                    request,
                    Some(&ResourceBody::Object(denial)),
                    429,
                    default_headers(),
                )
                .await?;

                Err(ApiError::RateLimited { retry_after })
            }
            RateDecision::Allowed => self.fabricate(request, context).await,
        }
    }

    async fn mutate_inner(
        &self,
        request: &InboundRequest,
        authenticated: bool,
    ) -> ApiResult<Served> {
        let (resource, context) = self.lookup(request).await?;

        let Some(resource) = resource else {
            // Unseen endpoint: fabricate like a GET. The exploration
            // limiter counts GETs only.
            return self.fabricate(request, context).await;
        };

        let Some(ResourceBody::Object(saved)) = &resource.body else {
            // Freeform content is read-only once materialized.
            return self.replay(request, &resource).await;
        };

        if !authenticated {
            let mut denial = Map::new();
            denial.insert(
                "detail".to_string(),
                Value::String("Invalid token".to_string()),
            );
            self.audit(
                request,
                Some(&ResourceBody::Object(denial)),
                401,
                &resource.headers,
            )
            .await?;

            return Err(ApiError::Unauthorized("Invalid token".to_string()));
        }

        let patch = request
            .body
            .as_ref()
            .map(|body| body.as_object())
            .unwrap_or_default();

        for key in patch.keys() {
            if !saved.contains_key(key) && key != "id" && key != "_id" {
                let mut violation = Map::new();
                violation.insert(
                    "error".to_string(),
                    Value::String(format!("Unknown field: {key}")),
                );
                self.audit(
                    request,
                    Some(&ResourceBody::Object(violation)),
                    400,
                    &resource.headers,
                )
                .await?;

                return Err(ApiError::UnknownField(key.clone()));
            }
        }

        let mut merged = saved.clone();
        for (key, value) in patch {
            merged.insert(key, value);
        }
        let body = ResourceBody::Object(merged);

        self.storage.update_body(resource.id, &body).await?;
        tracing::info!(id = resource.id, path = %request.full_path, "merged mutation");

        self.audit(request, Some(&body), 200, &resource.headers)
            .await?;

        Ok(Served {
            body: Some(body),
            status: 200,
            headers: resource.headers.clone(),
        })
    }

    /// The lookup chain. The embedding and canonical signature are only
    /// computed after the exact-path tier misses.
    async fn lookup(
        &self,
        request: &InboundRequest,
    ) -> ApiResult<(Option<FabricatedResource>, FabricationContext)> {
        if let Some(resource) = self.storage.find_by_path(&request.full_path).await? {
            return Ok((Some(resource), FabricationContext::default()));
        }

        let embedding = self.synthesizer.embed(&request.semantic_key()).await?;
        let canonical = request.canonical_signature(&request.method);

        let resource = self
            .storage
            .resolve(
                &request.full_path,
                Some(&canonical),
                Some(&embedding),
                self.vector_threshold,
            )
            .await?;

        Ok((
            resource,
            FabricationContext {
                canonical: Some(canonical),
                embedding: Some(embedding),
            },
        ))
    }

    async fn replay(
        &self,
        request: &InboundRequest,
        resource: &FabricatedResource,
    ) -> ApiResult<Served> {
        self.audit(request, resource.body.as_ref(), resource.status, &resource.headers)
            .await?;
        Ok(Served::from_resource(resource))
    }

    async fn fabricate(
        &self,
        request: &InboundRequest,
        context: FabricationContext,
    ) -> ApiResult<Served> {
        let reply = self.synthesizer.fabricate(request).await?;
        let headers = sanitize_headers(&reply.headers);

        let id = self
            .storage
            .create(NewResource {
                canonical_key: context.canonical,
                path: Some(request.full_path.clone()),
                body: reply.body.clone(),
                status: reply.status,
                headers: headers.clone(),
                embedding: context.embedding,
            })
            .await?;

        tracing::info!(
            id,
            path = %request.full_path,
            status = reply.status,
            "fabricated resource"
        );

        self.audit(request, reply.body.as_ref(), reply.status, &headers)
            .await?;

        Ok(Served {
            body: reply.body,
            status: reply.status,
            headers,
        })
    }

    async fn audit(
        &self,
        request: &InboundRequest,
        body: Option<&ResourceBody>,
        status: u16,
        headers: &BTreeMap<String, String>,
    ) -> ApiResult<()> {
        self.storage
            .record(InteractionRecord::new(request, body, status, headers))
            .await?;
        Ok(())
    }

    async fn release_gate(&self, fingerprint: &str) {
        if let Err(error) = self.gate.release(fingerprint).await {
            tracing::warn!(%error, fingerprint, "gate release failed; TTL will reap it");
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<LimiterError> for ApiError {
    fn from(err: LimiterError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        ApiError::Collaborator(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MemoryGate;
    use crate::ratelimit::MemoryLimiter;
    use crate::storage::InMemoryStorage;
    use crate::storage::ResourceStore;
    use async_trait::async_trait;
    use mirage_types::ModelReply;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted collaborator: fixed reply, counts calls, optional artificial
    /// latency to provoke gate collisions. Embeddings derive from the text
    /// by default, so distinct requests land far apart in vector space; a
    /// fixed embedding collapses everything onto one point.
    struct ScriptedSynthesizer {
        reply: ModelReply,
        fixed_embedding: Option<Vec<f32>>,
        fabrications: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSynthesizer {
        fn new(reply: ModelReply) -> Self {
            Self {
                reply,
                fixed_embedding: None,
                fabrications: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn object_reply() -> ModelReply {
            ModelReply::parse(
                r#"{"body": {"name": "widget", "stock": 3}, "status_code": 200, "headers": {"X-Custom": "ok", "Content-Length": "999"}}"#,
            )
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn with_fixed_embedding(mut self, embedding: Vec<f32>) -> Self {
            self.fixed_embedding = Some(embedding);
            self
        }

        fn fabrication_count(&self) -> usize {
            self.fabrications.load(Ordering::SeqCst)
        }

        /// Signed pseudo-embedding from a digest; unrelated texts come out
        /// nearly orthogonal, far below the similarity threshold.
        fn hash_embedding(text: &str) -> Vec<f32> {
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(text.as_bytes());
            digest.iter().map(|b| f32::from(*b) - 127.5).collect()
        }
    }

    #[async_trait]
    impl ResponseSynthesizer for ScriptedSynthesizer {
        async fn fabricate(&self, _request: &InboundRequest) -> Result<ModelReply, ModelError> {
            self.fabrications.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.reply.clone())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
            Ok(match &self.fixed_embedding {
                Some(embedding) => embedding.clone(),
                None => Self::hash_embedding(text),
            })
        }
    }

    struct Harness {
        engine: ResolutionEngine,
        storage: Arc<InMemoryStorage>,
        synthesizer: Arc<ScriptedSynthesizer>,
    }

    fn harness_with(synthesizer: ScriptedSynthesizer, rate_limit: u64) -> Harness {
        let storage = Arc::new(InMemoryStorage::new());
        let synthesizer = Arc::new(synthesizer);
        let engine = ResolutionEngine::new(
            storage.clone(),
            Arc::new(MemoryGate::new(Duration::from_secs(30))),
            Arc::new(MemoryLimiter::new(rate_limit, 900)),
            synthesizer.clone(),
            0.8,
        );
        Harness {
            engine,
            storage,
            synthesizer,
        }
    }

    fn harness() -> Harness {
        harness_with(
            ScriptedSynthesizer::new(ScriptedSynthesizer::object_reply()),
            10,
        )
    }

    fn get(path: &str, query: Vec<(&str, &str)>) -> InboundRequest {
        request("GET", path, query, None)
    }

    fn request(
        method: &str,
        path: &str,
        query: Vec<(&str, &str)>,
        body: Option<&[u8]>,
    ) -> InboundRequest {
        InboundRequest::new(
            "198.51.100.7",
            method,
            path,
            query
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body.and_then(mirage_types::RequestBody::from_bytes),
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn replays_are_byte_identical_and_each_audited() {
        let h = harness();
        let req = get("/api/v1/widgets", vec![]);

        let first = h.engine.resolve_get(&req).await.unwrap();
        let second = h.engine.resolve_get(&req).await.unwrap();
        let third = h.engine.resolve_get(&req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(h.synthesizer.fabrication_count(), 1);
        assert_eq!(h.storage.resource_count().await, 1);
        assert_eq!(h.storage.interactions().await.len(), 3);
    }

    #[tokio::test]
    async fn query_order_does_not_split_resources() {
        let h = harness();

        let first = h
            .engine
            .resolve_get(&get("/orders", vec![("b", "2"), ("a", "1")]))
            .await
            .unwrap();
        let second = h
            .engine
            .resolve_get(&get("/orders", vec![("a", "1"), ("b", "2")]))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(h.storage.resource_count().await, 1);
    }

    #[tokio::test]
    async fn canonical_tier_matches_pathless_resources() {
        let h = harness();
        h.storage
            .create(NewResource {
                canonical_key: Some("GET:/reports?year=2025".to_string()),
                path: None,
                body: Some(ResourceBody::Text("archived".to_string())),
                status: 200,
                headers: BTreeMap::new(),
                embedding: None,
            })
            .await
            .unwrap();

        let served = h
            .engine
            .resolve_get(&get("/reports", vec![("year", "2025")]))
            .await
            .unwrap();

        assert_eq!(served.body, Some(ResourceBody::Text("archived".to_string())));
        assert_eq!(h.synthesizer.fabrication_count(), 0);
    }

    #[tokio::test]
    async fn vector_tier_reuses_semantically_close_resources() {
        let h = harness_with(
            ScriptedSynthesizer::new(ScriptedSynthesizer::object_reply())
                .with_fixed_embedding(vec![1.0, 0.0, 0.0]),
            10,
        );

        // First path fabricates and stores the scripted embedding.
        h.engine
            .resolve_get(&get("/api/v1/customers", vec![]))
            .await
            .unwrap();

        // Different path, same embedding: vector tier hits, nothing new.
        let served = h
            .engine
            .resolve_get(&get("/api/v2/clients", vec![]))
            .await
            .unwrap();

        assert_eq!(h.synthesizer.fabrication_count(), 1);
        assert_eq!(h.storage.resource_count().await, 1);
        assert!(matches!(served.body, Some(ResourceBody::Object(_))));
    }

    #[tokio::test]
    async fn with_no_embedding_rows_a_novel_path_fabricates_directly() {
        let h = harness();
        assert_eq!(h.storage.resource_count().await, 0);

        h.engine.resolve_get(&get("/fresh", vec![])).await.unwrap();

        assert_eq!(h.synthesizer.fabrication_count(), 1);
        assert_eq!(h.storage.resource_count().await, 1);
    }

    #[tokio::test]
    async fn held_gate_rejects_without_state_change_or_audit() {
        let h = harness();
        let req = get("/contended", vec![]);

        h.engine.gate.acquire(&req.fingerprint()).await.unwrap();

        let outcome = h.engine.resolve_get(&req).await;
        assert!(matches!(outcome, Err(ApiError::LockContended)));
        assert_eq!(h.storage.resource_count().await, 0);
        assert!(h.storage.interactions().await.is_empty());
        assert_eq!(h.synthesizer.fabrication_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_first_requests_fabricate_exactly_once() {
        let h = harness_with(
            ScriptedSynthesizer::new(ScriptedSynthesizer::object_reply())
                .with_delay(Duration::from_millis(50)),
            10,
        );
        let engine = Arc::new(h.engine);
        let req = get("/contended", vec![]);

        let a = tokio::spawn({
            let engine = engine.clone();
            let req = req.clone();
            async move { engine.resolve_get(&req).await }
        });
        let b = tokio::spawn({
            let engine = engine.clone();
            let req = req.clone();
            async move { engine.resolve_get(&req).await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let losses = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ApiError::LockContended)))
            .count();

        // A loser sees the locked outcome; a straggler that arrives after
        // the winner released simply replays. Either way there is exactly
        // one fabrication and one persisted resource.
        assert!(losses <= 1);
        assert_eq!(h.synthesizer.fabrication_count(), 1);
        assert_eq!(h.storage.resource_count().await, 1);
    }

    #[tokio::test]
    async fn eleventh_novel_get_is_rate_limited() {
        let h = harness();

        for i in 0..10 {
            h.engine
                .resolve_get(&get(&format!("/novel{i}"), vec![]))
                .await
                .unwrap();
        }

        let outcome = h.engine.resolve_get(&get("/novel10", vec![])).await;
        match outcome {
            Err(ApiError::RateLimited { retry_after }) => {
                assert!(retry_after <= 900);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        // 10 fabrications + 1 rate-limited outcome, each audited.
        assert_eq!(h.storage.interactions().await.len(), 11);
        assert_eq!(h.storage.resource_count().await, 10);
    }

    #[tokio::test]
    async fn replays_are_never_rate_limited() {
        let h = harness_with(
            ScriptedSynthesizer::new(ScriptedSynthesizer::object_reply()),
            1,
        );
        let req = get("/cached", vec![]);

        h.engine.resolve_get(&req).await.unwrap();
        for _ in 0..5 {
            assert!(h.engine.resolve_get(&req).await.is_ok());
        }
    }

    #[tokio::test]
    async fn unknown_field_is_rejected_with_400() {
        let h = harness();
        h.engine.resolve_get(&get("/api/v1/widgets", vec![])).await.unwrap();

        let outcome = h
            .engine
            .resolve_mutation(
                &request(
                    "POST",
                    "/api/v1/widgets",
                    vec![],
                    Some(br#"{"stock": 5, "color": "red"}"#),
                ),
                true,
            )
            .await;

        match outcome {
            Err(ApiError::UnknownField(field)) => assert_eq!(field, "color"),
            other => panic!("expected unknown field, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn merge_overwrites_shared_keys_and_preserves_the_rest() {
        let h = harness();
        h.engine.resolve_get(&get("/api/v1/widgets", vec![])).await.unwrap();

        let served = h
            .engine
            .resolve_mutation(
                &request(
                    "PATCH",
                    "/api/v1/widgets",
                    vec![],
                    Some(br#"{"stock": 5, "_id": "abc"}"#),
                ),
                true,
            )
            .await
            .unwrap();

        assert_eq!(served.status, 200);
        let Some(ResourceBody::Object(map)) = &served.body else {
            panic!("expected object body");
        };
        assert_eq!(map.get("stock"), Some(&json!(5)));
        assert_eq!(map.get("name"), Some(&json!("widget")));
        assert_eq!(map.get("_id"), Some(&json!("abc")));

        // Persisted, so the next GET replays the merged view.
        let replay = h
            .engine
            .resolve_get(&get("/api/v1/widgets", vec![]))
            .await
            .unwrap();
        assert_eq!(replay.body, served.body);
    }

    #[tokio::test]
    async fn mutating_an_object_without_a_token_records_401() {
        let h = harness();
        h.engine.resolve_get(&get("/api/v1/widgets", vec![])).await.unwrap();

        let outcome = h
            .engine
            .resolve_mutation(
                &request("POST", "/api/v1/widgets", vec![], Some(br#"{"stock": 1}"#)),
                false,
            )
            .await;

        assert!(matches!(outcome, Err(ApiError::Unauthorized(_))));
        let interactions = h.storage.interactions().await;
        assert_eq!(interactions.last().unwrap().response_status, 401);
    }

    #[tokio::test]
    async fn freeform_hits_echo_unchanged_without_auth() {
        let h = harness_with(
            ScriptedSynthesizer::new(ModelReply::parse("just some prose")),
            10,
        );
        h.engine.resolve_get(&get("/readme", vec![])).await.unwrap();

        let served = h
            .engine
            .resolve_mutation(
                &request("PUT", "/readme", vec![], Some(br#"{"_text": "overwrite"}"#)),
                false,
            )
            .await
            .unwrap();

        assert_eq!(
            served.body,
            Some(ResourceBody::Text("just some prose".to_string()))
        );
    }

    #[tokio::test]
    async fn mutation_on_a_miss_fabricates_like_a_get() {
        let h = harness();

        let served = h
            .engine
            .resolve_mutation(
                &request("POST", "/api/v1/widgets", vec![], Some(br#"{"seed": 1}"#)),
                false,
            )
            .await
            .unwrap();

        assert_eq!(served.status, 200);
        assert_eq!(h.synthesizer.fabrication_count(), 1);
        assert_eq!(h.storage.resource_count().await, 1);
    }

    #[tokio::test]
    async fn delete_records_204_and_removes_nothing() {
        let h = harness();
        h.engine.resolve_get(&get("/api/v1/widgets", vec![])).await.unwrap();

        let served = h
            .engine
            .resolve_delete(&request("DELETE", "/api/v1/widgets", vec![], None))
            .await
            .unwrap();

        assert_eq!(served.status, 204);
        assert_eq!(served.body, None);
        assert_eq!(h.storage.resource_count().await, 1);

        let interactions = h.storage.interactions().await;
        assert_eq!(interactions.last().unwrap().response_status, 204);

        // The resource is still served afterwards; deletion is cosmetic.
        assert!(h.engine.resolve_get(&get("/api/v1/widgets", vec![])).await.is_ok());
    }

    #[tokio::test]
    async fn fabricated_headers_are_sanitized_before_persisting() {
        let h = harness();
        let served = h
            .engine
            .resolve_get(&get("/api/v1/widgets", vec![]))
            .await
            .unwrap();

        assert_eq!(served.headers.get("X-Custom").map(String::as_str), Some("ok"));
        assert!(!served.headers.keys().any(|k| k.eq_ignore_ascii_case("content-length")));
    }
}
