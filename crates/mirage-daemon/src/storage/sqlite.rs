//! SQLite storage backend
//!
//! One `resources` row per fabricated endpoint, embeddings as little-endian
//! f32 blobs keyed by resource id, an append-only `interactions` table, and
//! the login stub's `users` table. The resource row and its embedding row
//! are written in one transaction.

use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{InteractionStore, ResourceStore, UserStore};
use crate::storage::{cosine_distance, similarity};
use async_trait::async_trait;
use mirage_types::{
    decode_headers, encode_headers, FabricatedResource, InteractionRecord, NewResource,
    ResourceBody,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;

/// SQLite-backed storage
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database and apply the schema.
    pub async fn connect(path: &Path, max_connections: u32) -> StorageResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(format!("sqlite connect failed: {e}")))?;

        let storage = Self { pool };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                canonical_key TEXT NULL UNIQUE,
                path TEXT NULL UNIQUE,
                response_body TEXT NULL,
                response_status INTEGER NOT NULL DEFAULT 200,
                response_headers TEXT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                resource_id INTEGER PRIMARY KEY,
                vector BLOB NOT NULL,
                FOREIGN KEY (resource_id) REFERENCES resources(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_ip TEXT NULL,
                method TEXT NOT NULL,
                path TEXT NOT NULL,
                query_params TEXT NULL,
                semantic_key TEXT NULL,
                headers_json TEXT NULL,
                request_body TEXT NULL,
                response_body TEXT NULL,
                response_status INTEGER NOT NULL,
                response_headers TEXT NULL,
                requested_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                client_ip TEXT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_username ON users (username)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_resource(row: &SqliteRow) -> FabricatedResource {
        let body: Option<String> = row.get("response_body");
        let headers: Option<String> = row.get("response_headers");
        let status: i64 = row.get("response_status");

        FabricatedResource {
            id: row.get("id"),
            canonical_key: row.get("canonical_key"),
            path: row.get("path"),
            body: ResourceBody::decode_opt(body.as_deref()),
            status: u16::try_from(status).unwrap_or(200),
            headers: decode_headers(headers.as_deref()),
        }
    }
}

const RESOURCE_COLUMNS: &str =
    "id, canonical_key, path, response_body, response_status, response_headers";

#[async_trait]
impl ResourceStore for SqliteStorage {
    async fn find_by_path(&self, path: &str) -> StorageResult<Option<FabricatedResource>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE path = ?1"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_resource))
    }

    async fn find_by_canonical(&self, key: &str) -> StorageResult<Option<FabricatedResource>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE canonical_key = ?1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_resource))
    }

    async fn find_by_vector(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> StorageResult<Option<FabricatedResource>> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            return Ok(None);
        }

        let rows = sqlx::query("SELECT resource_id, vector FROM embeddings")
            .fetch_all(&self.pool)
            .await?;

        let mut nearest: Option<(i64, f32)> = None;
        for row in &rows {
            let resource_id: i64 = row.get("resource_id");
            let blob: Vec<u8> = row.get("vector");
            let distance = cosine_distance(embedding, &blob_to_vector(&blob));

            if nearest.map_or(true, |(_, best)| distance < best) {
                nearest = Some((resource_id, distance));
            }
        }

        let Some((resource_id, distance)) = nearest else {
            return Ok(None);
        };
        if similarity(distance) < threshold {
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?1"
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_resource))
    }

    async fn create(&self, resource: NewResource) -> StorageResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO resources (canonical_key, path, response_body, response_status, response_headers)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&resource.canonical_key)
        .bind(&resource.path)
        .bind(ResourceBody::encode_opt(resource.body.as_ref()))
        .bind(i64::from(resource.status))
        .bind(encode_headers(&resource.headers))
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();

        if let Some(embedding) = &resource.embedding {
            sqlx::query("INSERT INTO embeddings (resource_id, vector) VALUES (?1, ?2)")
                .bind(id)
                .bind(vector_to_blob(embedding))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn update_body(&self, id: i64, body: &ResourceBody) -> StorageResult<()> {
        sqlx::query("UPDATE resources SET response_body = ?1 WHERE id = ?2")
            .bind(body.encode())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for SqliteStorage {
    async fn record(&self, record: InteractionRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO interactions (
                client_ip, method, path, query_params, semantic_key,
                headers_json, request_body, response_body,
                response_status, response_headers, requested_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&record.client_ip)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.query_json)
        .bind(&record.semantic_key)
        .bind(&record.headers_json)
        .bind(&record.request_body)
        .bind(&record.response_body)
        .bind(i64::from(record.response_status))
        .bind(&record.response_headers)
        .bind(record.requested_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for SqliteStorage {
    async fn username_exists(&self, username: &str) -> StorageResult<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE username = ?1 LIMIT 1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_user(
        &self,
        username: &str,
        password: &str,
        client_ip: &str,
    ) -> StorageResult<()> {
        sqlx::query("INSERT INTO users (username, password, client_ip) VALUES (?1, ?2, ?3)")
            .bind(username)
            .bind(password)
            .bind(client_ip)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
