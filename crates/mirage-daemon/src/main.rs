//! Mirage Daemon - adaptive deception endpoint
//!
//! Serves fabricated-but-persistent responses for paths that correspond to
//! no real backend: requests are canonicalized, matched against previously
//! fabricated resources (exact path, canonical signature, or vector
//! similarity), and only genuinely novel endpoints reach the generative
//! collaborator.

use clap::Parser;
use mirage_daemon::config::DaemonConfig;
use mirage_daemon::error::{DaemonError, DaemonResult};
use mirage_daemon::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mirage Daemon CLI
#[derive(Parser)]
#[command(name = "miraged")]
#[command(about = "Mirage daemon - adaptive deception endpoint", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MIRAGE_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "MIRAGE_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "MIRAGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "MIRAGE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        "starting mirage daemon"
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
