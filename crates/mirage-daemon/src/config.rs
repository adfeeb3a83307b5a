//! Configuration for mirage-daemon

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Resource/interaction storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Shared key-value store (fabrication gate + exploration counters)
    #[serde(default)]
    pub shared_state: SharedStateConfig,

    /// Generative/embedding collaborator configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Resolution engine tunables
    #[serde(default)]
    pub engine: EngineConfig,

    /// Token issuing configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Startup-loaded prompt templates and attack catalog
    #[serde(default)]
    pub templates: TemplatesConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            shared_state: SharedStateConfig::default(),
            model: ModelConfig::default(),
            engine: EngineConfig::default(),
            auth: AuthConfig::default(),
            templates: TemplatesConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().expect("default listen address"),
        }
    }
}

/// Resource storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    Memory,

    /// SQLite storage
    Sqlite {
        /// Database file path
        path: PathBuf,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: PathBuf::from("mirage.db"),
            max_connections: default_pool_size(),
        }
    }
}

/// Shared key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SharedStateConfig {
    /// In-process gate and counters (single-instance deployments, tests)
    Memory,

    /// Redis-backed gate and counters
    Redis {
        /// Connection URL
        url: String,
    },
}

impl Default for SharedStateConfig {
    fn default() -> Self {
        SharedStateConfig::Memory
    }
}

/// Which chat API shape the generative collaborator speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackendKind {
    /// Ollama native `/api/chat` + `/api/embeddings`
    Ollama,
    /// OpenAI-compatible `/chat/completions` with a bearer key
    OpenAi,
}

/// Generative/embedding collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend API shape
    pub backend: ModelBackendKind,

    /// Base endpoint; embeddings are always served by an Ollama-shaped
    /// endpoint even when chat goes to an OpenAI-compatible one
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,

    /// Chat model name
    #[serde(default = "default_model_name")]
    pub model: String,

    /// Embedding model name
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// API key for OpenAI-compatible backends
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call timeout in seconds; bounds the generative call
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackendKind::Ollama,
            endpoint: default_model_endpoint(),
            model: default_model_name(),
            embed_model: default_embed_model(),
            api_key: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

/// Resolution engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fabrication gate TTL in seconds
    #[serde(default = "default_gate_ttl")]
    pub gate_ttl_secs: u64,

    /// Novel-GET budget per client per window
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u64,

    /// Rate-limit window in seconds
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: i64,

    /// Minimum similarity for a vector match (cosine, `s = 1 - d`)
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate_ttl_secs: default_gate_ttl(),
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window(),
            vector_threshold: default_vector_threshold(),
        }
    }
}

/// Token issuing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS512 signing secret
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Token lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// Startup asset locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory holding the prompt templates and attack catalog
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
        }
    }
}

// Default value helpers
fn default_pool_size() -> u32 {
    5
}

fn default_model_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model_name() -> String {
    "llama3.1:8b".to_string()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_model_timeout() -> u64 {
    90
}

fn default_gate_ttl() -> u64 {
    30
}

fn default_rate_limit() -> u64 {
    10
}

fn default_rate_window() -> i64 {
    900
}

fn default_vector_threshold() -> f32 {
    0.8
}

fn default_secret() -> String {
    "change-me".to_string()
}

fn default_token_ttl() -> i64 {
    9000
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file, and `MIRAGE_*`
    /// environment variables, in that order.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MIRAGE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(matches!(config.storage, StorageConfig::Sqlite { .. }));
        assert!(matches!(config.shared_state, SharedStateConfig::Memory));
    }

    #[test]
    fn test_engine_defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.gate_ttl_secs, 30);
        assert_eq!(config.rate_limit, 10);
        assert_eq!(config.rate_window_secs, 900);
        assert!((config.vector_threshold - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_model_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.backend, ModelBackendKind::Ollama);
        assert_eq!(config.timeout_secs, 90);
    }
}
