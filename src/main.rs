//! SSH audit proxy - Entry point
//!
//! Parses CLI arguments, loads the inventory and host key, then runs the
//! gateway until it fails or a shutdown signal arrives.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ssh_audit_proxy::config::{Args, Config};
use ssh_audit_proxy::proxy::ProxySession;
use ssh_audit_proxy::server::GatewayServer;
use ssh_audit_proxy::service::{Inventory, InventoryService};
use ssh_audit_proxy::ssh::SshTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("SSH audit proxy v{} starting...", env!("CARGO_PKG_VERSION"));

    let inventory = Inventory::load(&config.inventory)
        .await
        .with_context(|| format!("Failed to load inventory {}", config.inventory.display()))?;
    info!(
        "Inventory: {} users, {} assets, {} system users, {} permissions",
        inventory.users.len(),
        inventory.assets.len(),
        inventory.system_users.len(),
        inventory.permissions.len()
    );

    let mut service = InventoryService::new(inventory);
    if let Some(ref path) = config.audit_log {
        info!("Appending audit records to {}", path.display());
        service = service.with_audit_log(path);
    }
    let service = Arc::new(service);

    let host_key = russh::keys::load_secret_key(&config.host_key, None)
        .with_context(|| format!("Failed to load host key {}", config.host_key.display()))?;

    info!(
        "Connect timeout: {}s, read timeout: {}s, ignored commands: {:?}",
        config.session.connect_timeout.as_secs(),
        config.session.read_timeout.as_secs(),
        config.session.ignore_commands
    );

    let proxy = ProxySession::new(
        service.clone(),
        Arc::new(SshTransport::new()),
        config.session.clone(),
    )?;
    let gateway = GatewayServer::new(service, proxy, config.session.term.clone());

    tokio::select! {
        result = gateway.serve(config.listen, host_key) => {
            if let Err(e) = result {
                error!("Gateway error: {:#}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    info!("SSH audit proxy stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
