//! Storage trait definitions

use crate::error::StorageResult;
use async_trait::async_trait;
use mirage_types::{FabricatedResource, InteractionRecord, NewResource, ResourceBody};

/// Combined storage trait
pub trait Storage: ResourceStore + InteractionStore + UserStore + Send + Sync {}

impl<T: ResourceStore + InteractionStore + UserStore + Send + Sync> Storage for T {}

/// Storage for fabricated resources and their embeddings
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Exact path lookup
    async fn find_by_path(&self, path: &str) -> StorageResult<Option<FabricatedResource>>;

    /// Exact canonical-signature lookup
    async fn find_by_canonical(&self, key: &str) -> StorageResult<Option<FabricatedResource>>;

    /// Nearest-neighbor lookup over stored embeddings.
    ///
    /// Must be a no-op when no embedding rows exist. The single nearest
    /// neighbor is accepted iff its similarity (see
    /// [`crate::storage::similarity`]) clears `threshold`.
    async fn find_by_vector(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> StorageResult<Option<FabricatedResource>>;

    /// Persist a resource row together with its embedding row. Both appear
    /// together or not at all.
    async fn create(&self, resource: NewResource) -> StorageResult<i64>;

    /// Replace only the body of an existing resource. Status and headers
    /// are immutable after creation.
    async fn update_body(&self, id: i64, body: &ResourceBody) -> StorageResult<()>;

    /// The fallback chain: path, then canonical, then vector, short-circuiting
    /// on the first hit. The order is a contract — an exact path hit must
    /// never be shadowed by a canonical or vector match.
    async fn resolve(
        &self,
        path: &str,
        canonical_key: Option<&str>,
        embedding: Option<&[f32]>,
        threshold: f32,
    ) -> StorageResult<Option<FabricatedResource>> {
        if let Some(resource) = self.find_by_path(path).await? {
            return Ok(Some(resource));
        }

        if let Some(key) = canonical_key {
            if let Some(resource) = self.find_by_canonical(key).await? {
                return Ok(Some(resource));
            }
        }

        if let Some(embedding) = embedding {
            if let Some(resource) = self.find_by_vector(embedding, threshold).await? {
                return Ok(Some(resource));
            }
        }

        Ok(None)
    }
}

/// Append-only sink for interaction records
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Append one audit row
    async fn record(&self, record: InteractionRecord) -> StorageResult<()>;
}

/// Storage for the login stub's user rows
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Whether a username was already captured
    async fn username_exists(&self, username: &str) -> StorageResult<bool>;

    /// Capture credentials in the clear, with the client that sent them
    async fn insert_user(
        &self,
        username: &str,
        password: &str,
        client_ip: &str,
    ) -> StorageResult<()>;
}
