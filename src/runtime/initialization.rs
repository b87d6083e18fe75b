//! # Initialization
//!
//! Operator startup: rustls setup, tracing, metrics, configuration, the
//! Kubernetes client, the reconciliation components and the HTTP server.

use crate::config::{OperatorConfig, SharedOperatorConfig};
use crate::controller::events::KubeFailureRecorder;
use crate::controller::reconciler::{KubeResourceFetcher, Reconciler, VaultReconciler};
use crate::controller::secrets::{KubeSecretStore, SecretManager};
use crate::crd::VaultTransitUnseal;
use crate::health::{HealthChecker, VaultStatusProbe};
use crate::observability;
use crate::runtime::error_policy::OutcomeClassifier;
use crate::runtime::queue::WorkQueue;
use crate::runtime::scheduler::Scheduler;
use crate::server::{self, ServerState};
use crate::vault::PodClientFactory;
use anyhow::{Context, Result};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Everything `main` needs to run the operator
pub struct InitializationResult {
    pub config: SharedOperatorConfig,
    /// API the watch loop lists and watches
    pub resources: Api<VaultTransitUnseal>,
    pub queue: Arc<WorkQueue>,
    pub scheduler: Scheduler,
    pub server_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Install the ring crypto provider for rustls
///
/// Must run before any TLS client is built.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}

/// Initialize tracing with `RUST_LOG`, defaulting to info for this crate
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vault_transit_unseal_operator=info".into());
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Initialize the operator runtime
///
/// # Errors
///
/// Fails on invalid configuration, metrics registration errors, when no
/// Kubernetes client can be built or the probe port cannot be bound.
pub async fn initialize() -> Result<InitializationResult> {
    install_crypto_provider();
    init_tracing();

    info!("Starting Vault Transit Unseal Operator");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let config: SharedOperatorConfig =
        Arc::new(OperatorConfig::from_env().context("Invalid operator configuration")?);
    info!(
        min_backoff_secs = config.min_backoff.as_secs(),
        max_backoff_secs = config.max_backoff.as_secs(),
        max_concurrent = config.max_concurrent_reconciles,
        config_error_max_attempts = config.config_error_max_attempts,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Configuration loaded"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let factory = PodClientFactory::from_config(&config);
    let secrets = SecretManager::new(Arc::new(KubeSecretStore::new(client.clone())));
    let delegate = VaultReconciler::new(client.clone(), Arc::new(factory), secrets);
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeResourceFetcher::new(client.clone())),
        Arc::new(delegate),
        OutcomeClassifier::from_config(&config),
    )
    .with_failure_recorder(Arc::new(KubeFailureRecorder::new(client.clone()))));

    let queue = Arc::new(WorkQueue::new());
    let scheduler = Scheduler::from_config(&config, Arc::clone(&queue), reconciler);

    let probe = VaultStatusProbe::new(
        client.clone(),
        factory,
        config.vault_namespace.clone(),
        config.vault_pod_selector.clone(),
    );
    let server_state = Arc::new(ServerState {
        health: HealthChecker::new(scheduler.alive(), Arc::new(probe)),
        probe_timeout: config.probe_timeout,
    });

    // A taken port fails startup
    let listener = server::bind(config.metrics_port).await?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let resources: Api<VaultTransitUnseal> = match config.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        config,
        resources,
        queue,
        scheduler,
        server_handle,
    })
}
