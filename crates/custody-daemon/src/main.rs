//! Custody Daemon - Main entry point
//!
//! Loads the configuration and root seed, then serves vault sessions on the
//! IPC socket until interrupted.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use custody_daemon::{IpcServer, SeedStore, Vault, VaultConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "custody_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting custody daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = VaultConfig::default_path();
    let config = VaultConfig::load_or_create(&config_path)
        .with_context(|| format!("loading config from {:?}", config_path))?;
    config.validate()?;
    config.ensure_directories()?;

    // Without a seed there is nothing to serve
    let seed_store = SeedStore::new(config.seed_path.clone());
    let root = seed_store
        .get_or_create_root_seed()
        .context("root seed unavailable")?;

    let vault = Arc::new(Vault::new(root, &config)?);
    info!(
        attestation_key = %vault.attestation_key().to_hex(),
        "Vault ready"
    );

    let server = IpcServer::new(
        config.ipc_socket_path.clone(),
        vault,
        config.max_pending_requests,
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Daemon shutting down");

    Ok(())
}
