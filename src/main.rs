//! Code Duel Server
//!
//! Configuration comes from the environment; see [`ServerConfig::from_env`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use code_duel::{GameServer, ServerConfig, CODE_LENGTH, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!("Code Duel Server v{}", VERSION);
    info!("Code length: {} distinct digits", CODE_LENGTH);
    info!(
        "Max connections: {}, queue timeout: {:?}",
        config.max_connections, config.router.queue_timeout
    );

    let stats = config
        .open_stats_store()
        .context("failed to open stats store")?;
    let server = Arc::new(GameServer::new(config, stats));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}
