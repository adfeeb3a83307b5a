//! In-memory storage implementation

use crate::error::StorageResult;
use crate::storage::traits::{InteractionStore, ResourceStore, UserStore};
use crate::storage::{cosine_distance, similarity};
use async_trait::async_trait;
use mirage_types::{FabricatedResource, InteractionRecord, NewResource, ResourceBody};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    resources: Arc<RwLock<Vec<FabricatedResource>>>,
    embeddings: Arc<RwLock<Vec<(i64, Vec<f32>)>>>,
    interactions: Arc<RwLock<Vec<InteractionRecord>>>,
    users: Arc<RwLock<Vec<(String, String, String)>>>,
    next_id: AtomicI64,
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded interactions, for assertions in tests
    pub async fn interactions(&self) -> Vec<InteractionRecord> {
        self.interactions.read().await.clone()
    }

    /// Number of persisted resources, for assertions in tests
    pub async fn resource_count(&self) -> usize {
        self.resources.read().await.len()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStorage {
    async fn find_by_path(&self, path: &str) -> StorageResult<Option<FabricatedResource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .find(|r| r.path.as_deref() == Some(path))
            .cloned())
    }

    async fn find_by_canonical(&self, key: &str) -> StorageResult<Option<FabricatedResource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .find(|r| r.canonical_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_by_vector(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> StorageResult<Option<FabricatedResource>> {
        let embeddings = self.embeddings.read().await;
        if embeddings.is_empty() {
            return Ok(None);
        }

        let mut nearest: Option<(i64, f32)> = None;
        for (id, stored) in embeddings.iter() {
            let distance = cosine_distance(embedding, stored);
            if nearest.map_or(true, |(_, best)| distance < best) {
                nearest = Some((*id, distance));
            }
        }
        drop(embeddings);

        let Some((id, distance)) = nearest else {
            return Ok(None);
        };
        if similarity(distance) < threshold {
            return Ok(None);
        }

        let resources = self.resources.read().await;
        Ok(resources.iter().find(|r| r.id == id).cloned())
    }

    async fn create(&self, resource: NewResource) -> StorageResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let mut resources = self.resources.write().await;
        resources.push(FabricatedResource {
            id,
            canonical_key: resource.canonical_key,
            path: resource.path,
            body: resource.body,
            status: resource.status,
            headers: resource.headers,
        });
        drop(resources);

        if let Some(embedding) = resource.embedding {
            self.embeddings.write().await.push((id, embedding));
        }

        Ok(id)
    }

    async fn update_body(&self, id: i64, body: &ResourceBody) -> StorageResult<()> {
        let mut resources = self.resources.write().await;
        if let Some(resource) = resources.iter_mut().find(|r| r.id == id) {
            resource.body = Some(body.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for InMemoryStorage {
    async fn record(&self, record: InteractionRecord) -> StorageResult<()> {
        self.interactions.write().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryStorage {
    async fn username_exists(&self, username: &str) -> StorageResult<bool> {
        let users = self.users.read().await;
        Ok(users.iter().any(|(name, _, _)| name == username))
    }

    async fn insert_user(
        &self,
        username: &str,
        password: &str,
        client_ip: &str,
    ) -> StorageResult<()> {
        self.users.write().await.push((
            username.to_string(),
            password.to_string(),
            client_ip.to_string(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn resource(path: &str) -> NewResource {
        NewResource {
            canonical_key: Some(format!("GET:{path}")),
            path: Some(path.to_string()),
            body: None,
            status: 200,
            headers: BTreeMap::new(),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn ids_are_assigned_sequentially() {
        let storage = InMemoryStorage::new();
        let a = storage.create(resource("/a")).await.unwrap();
        let b = storage.create(resource("/b")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn resolve_prefers_path_over_canonical_and_vector() {
        let storage = InMemoryStorage::new();

        let by_vector = NewResource {
            embedding: Some(vec![1.0, 0.0]),
            ..resource("/other")
        };
        storage.create(by_vector).await.unwrap();
        let exact = storage.create(resource("/exact")).await.unwrap();

        let hit = storage
            .resolve("/exact", Some("GET:/other"), Some(&[1.0, 0.0]), 0.8)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, exact);
    }
}
