//! # Health Checks
//!
//! Liveness and readiness of the operator process.
//!
//! - Liveness only reflects whether the reconciliation loop is running and
//!   never calls out of the process
//! - Readiness issues one lightweight status call to Vault, bounded by the
//!   probe deadline, and fails closed on error or timeout

use crate::vault::{PodClientFactory, VaultClientError, VaultClientFactory};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("reconciliation loop is not running")]
    LoopStopped,
    #[error("readiness probe exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
    #[error("failed to list vault pods: {0}")]
    PodList(#[source] kube::Error),
    #[error("no running vault pod with an IP matches '{selector}' in namespace '{namespace}'")]
    NoVaultPods { namespace: String, selector: String },
    #[error("vault is unreachable: {0}")]
    Unreachable(#[from] VaultClientError),
}

/// One lightweight status call against the external service
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn check(&self) -> Result<(), HealthError>;
}

/// Calls `sys/health` on the first running Vault pod matching a selector
#[derive(Clone)]
pub struct VaultStatusProbe {
    client: Client,
    factory: PodClientFactory,
    namespace: String,
    selector: String,
}

impl std::fmt::Debug for VaultStatusProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStatusProbe")
            .field("namespace", &self.namespace)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl VaultStatusProbe {
    #[must_use]
    pub const fn new(
        client: Client,
        factory: PodClientFactory,
        namespace: String,
        selector: String,
    ) -> Self {
        Self {
            client,
            factory,
            namespace,
            selector,
        }
    }
}

#[async_trait]
impl StatusProbe for VaultStatusProbe {
    async fn check(&self) -> Result<(), HealthError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods
            .list(&ListParams::default().labels(&self.selector))
            .await
            .map_err(HealthError::PodList)?;

        let pod = list
            .items
            .iter()
            .find(|pod| crate::controller::reconciler::vault::is_running_with_ip(pod))
            .ok_or_else(|| HealthError::NoVaultPods {
                namespace: self.namespace.clone(),
                selector: self.selector.clone(),
            })?;

        let vault = self.factory.new_client_for_pod(pod)?;
        vault.health().await?;
        Ok(())
    }
}

/// Probe hooks registered on the HTTP server
#[derive(Clone)]
pub struct HealthChecker {
    alive: Arc<AtomicBool>,
    probe: Arc<dyn StatusProbe>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    /// `alive` is the flag the scheduler raises while its loop runs
    #[must_use]
    pub fn new(alive: Arc<AtomicBool>, probe: Arc<dyn StatusProbe>) -> Self {
        Self { alive, probe }
    }

    /// # Errors
    ///
    /// [`HealthError::LoopStopped`] when the reconciliation loop is not running.
    pub fn liveness(&self) -> Result<(), HealthError> {
        if self.alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(HealthError::LoopStopped)
        }
    }

    /// # Errors
    ///
    /// The probe's error, or [`HealthError::DeadlineExceeded`] when it does
    /// not answer within `deadline`.
    pub async fn readiness(&self, deadline: Duration) -> Result<(), HealthError> {
        tokio::time::timeout(deadline, self.probe.check())
            .await
            .map_err(|_elapsed| HealthError::DeadlineExceeded(deadline))?
    }
}
