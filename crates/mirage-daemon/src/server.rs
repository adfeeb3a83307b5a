//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::auth::{LoginService, TokenIssuer};
use crate::config::{DaemonConfig, SharedStateConfig, StorageConfig};
use crate::engine::ResolutionEngine;
use crate::error::{DaemonError, DaemonResult};
use crate::gate::{FabricationGate, MemoryGate, RedisGate};
use crate::ratelimit::{ExplorationLimiter, MemoryLimiter, RedisLimiter};
use crate::storage::{InMemoryStorage, SqliteStorage, Storage};
use crate::synth::{ModelClient, ModelSynthesizer, PromptTemplates};
use mirage_types::AttackCatalog;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Mirage daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
}

impl Server {
    /// Wire storage, shared state, collaborators, and the engine together.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryStorage::new()),
            StorageConfig::Sqlite {
                path,
                max_connections,
            } => Arc::new(SqliteStorage::connect(path, *max_connections).await?),
        };

        let gate_ttl = Duration::from_secs(config.engine.gate_ttl_secs);
        let (gate, limiter): (Arc<dyn FabricationGate>, Arc<dyn ExplorationLimiter>) =
            match &config.shared_state {
                SharedStateConfig::Memory => (
                    Arc::new(MemoryGate::new(gate_ttl)),
                    Arc::new(MemoryLimiter::new(
                        config.engine.rate_limit,
                        config.engine.rate_window_secs,
                    )),
                ),
                SharedStateConfig::Redis { url } => {
                    let client = redis::Client::open(url.as_str())
                        .map_err(|e| DaemonError::SharedState(e.to_string()))?;
                    let conn = redis::aio::ConnectionManager::new(client)
                        .await
                        .map_err(|e| DaemonError::SharedState(e.to_string()))?;

                    (
                        Arc::new(RedisGate::new(conn.clone(), gate_ttl)),
                        Arc::new(RedisLimiter::new(
                            conn,
                            config.engine.rate_limit,
                            config.engine.rate_window_secs,
                        )),
                    )
                }
            };

        let (templates, catalog) = load_assets(&config.templates.dir)?;
        let client = ModelClient::new(config.model.clone())
            .map_err(|e| DaemonError::Server(e.to_string()))?;
        let synthesizer = Arc::new(ModelSynthesizer::new(client, catalog, templates));

        let engine = Arc::new(ResolutionEngine::new(
            storage.clone(),
            gate,
            limiter,
            synthesizer,
            config.engine.vector_threshold,
        ));

        let tokens = TokenIssuer::new(&config.auth.secret, config.auth.token_ttl_secs);
        let login = Arc::new(LoginService::new(storage, tokens.clone()));

        let state = AppState::new(engine, login, tokens);

        Ok(Self { config, state })
    }

    /// Run the server until a shutdown signal arrives.
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(self.state);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("mirage daemon listening on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("mirage daemon shutting down");

        Ok(())
    }
}

/// Load the prompt templates and the attack catalog.
///
/// Prompts are required; a missing or malformed catalog only costs the
/// attack bias, so it degrades to empty with a warning.
fn load_assets(dir: &Path) -> DaemonResult<(PromptTemplates, AttackCatalog)> {
    let system = std::fs::read_to_string(dir.join("system_prompt.txt"))
        .map_err(|e| DaemonError::Template(format!("system_prompt.txt: {e}")))?;
    let augment = std::fs::read_to_string(dir.join("augment_prompt.txt"))
        .map_err(|e| DaemonError::Template(format!("augment_prompt.txt: {e}")))?;

    let catalog = match std::fs::read_to_string(dir.join("attack_templates.json")) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(document) => AttackCatalog::from_json(&document),
            Err(error) => {
                tracing::warn!(%error, "attack catalog unparseable; proceeding without one");
                AttackCatalog::empty()
            }
        },
        Err(error) => {
            tracing::warn!(%error, "attack catalog missing; proceeding without one");
            AttackCatalog::empty()
        }
    };

    Ok((PromptTemplates { system, augment }, catalog))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
