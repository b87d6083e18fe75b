//! # Vault Transit Unseal Operator
//!
//! A Kubernetes operator keeping transit-sealed Vault installations
//! initialized and watching them recover from a sealed state.
//!
//! ## Overview
//!
//! 1. **Watches** `VaultTransitUnseal` resources and queues them for reconciliation
//! 2. **Observes** the selected Vault pods' seal status
//! 3. **Initializes** an uninitialized Vault and publishes its admin token and
//!    recovery keys as Kubernetes secrets
//! 4. **Reports** the result in the resource status and requeues on the
//!    configured check interval, backing off on errors
//!
//! Probes and Prometheus metrics are served on `METRICS_PORT`.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use vault_transit_unseal_operator::runtime::initialization::initialize;
use vault_transit_unseal_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = move || {
        let mut rx = shutdown_rx.clone();
        async move {
            let _changed = rx.wait_for(|stop| *stop).await;
        }
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal, running until killed: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown_tx.send_replace(true);
    });

    let watch = run_watch_loop(
        init.resources.clone(),
        Arc::clone(&init.queue),
        init.config.watch_restart_delay,
        shutdown(),
    );
    tokio::join!(watch, init.scheduler.run(shutdown()));

    init.server_handle.abort();
    info!("Operator stopped gracefully");
    Ok(())
}
