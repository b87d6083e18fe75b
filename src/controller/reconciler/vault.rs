//! # Vault Delegate
//!
//! Production [`ReconcileDelegate`]: observes the Vault pods selected by a
//! `VaultTransitUnseal`, initializes Vault on first contact and reports seal
//! state back through the resource status.
//!
//! ## Flow
//!
//! 1. Check the transit token secret exists (Vault reads it to reach the
//!    transit engine)
//! 2. List running Vault pods with an IP
//! 3. Query the seal status of each pod
//! 4. Initialize through the first pod when Vault is uninitialized and publish
//!    the admin token and recovery keys
//! 5. Patch status, then requeue after `monitoring.checkInterval`
//!
//! A sealed pod is a transient condition: Vault unseals itself through the
//! transit engine, the delegate only watches for it to happen.

use super::types::{ReconcileDelegate, ReconcileResult};
use crate::constants::{ANNOTATION_INITIALIZED_AT, ANNOTATION_MANAGED_BY, MANAGED_BY};
use crate::controller::secrets::SecretManager;
use crate::crd::{Condition, SecretNames, VaultTransitUnseal, VaultTransitUnsealStatus};
use crate::errors::{ErrorKind, OperatorError};
use crate::vault::{InitRequest, InitResponse, SealStatus, VaultClientFactory};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

const FIELD_MANAGER: &str = "vault-transit-unseal-operator";
const ADMIN_TOKEN_KEY: &str = "token";
const ROOT_TOKEN_KEY: &str = "root-token";
const PUBLISH_ATTEMPTS: u32 = 4;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(1);

static DURATION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").ok());

/// Parse a Kubernetes-style duration: `30s`, `5m`, `1h`, `1d`
///
/// # Errors
///
/// Config error when the string is empty, malformed or zero.
pub fn parse_kubernetes_duration(value: &str) -> Result<Duration, OperatorError> {
    let trimmed = value.trim();
    let invalid = |reason: &str| {
        OperatorError::config(format!("invalid duration '{trimmed}': {reason}"))
            .with_context("field", "monitoring.checkInterval")
    };

    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    let pattern = DURATION_PATTERN
        .as_ref()
        .ok_or_else(|| invalid("duration pattern unavailable"))?;
    let lower = trimmed.to_lowercase();
    let captures = pattern
        .captures(&lower)
        .ok_or_else(|| invalid("expected <number><unit> with unit s, m, h or d"))?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|_| invalid("number out of range"))?;
    if number == 0 {
        return Err(invalid("must be greater than zero"));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86400,
    };
    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid("number out of range"))
}

/// Pod is in phase `Running` and has been assigned an IP
#[must_use]
pub fn is_running_with_ip(pod: &Pod) -> bool {
    pod.status.as_ref().is_some_and(|status| {
        status.phase.as_deref() == Some("Running")
            && status.pod_ip.as_deref().is_some_and(|ip| !ip.is_empty())
    })
}

/// Namespace holding the Vault pods and the published secrets
#[must_use]
pub fn vault_namespace(resource: &VaultTransitUnseal) -> String {
    resource
        .spec
        .vault_pod
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| resource.namespace())
        .unwrap_or_else(|| "default".to_string())
}

/// Aggregated seal state over all observed pods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedState {
    pub initialized: bool,
    pub sealed: bool,
}

impl ObservedState {
    /// Initialized if any pod reports so; sealed if any pod is still sealed
    #[must_use]
    pub fn aggregate(statuses: &[SealStatus]) -> Self {
        Self {
            initialized: statuses.iter().any(|s| s.initialized),
            sealed: statuses.iter().any(|s| s.sealed),
        }
    }
}

/// Status to publish for an observed state, keeping the Ready transition
/// time when readiness did not flip
#[must_use]
pub fn desired_status(
    previous: Option<&VaultTransitUnsealStatus>,
    state: ObservedState,
    now: &str,
) -> VaultTransitUnsealStatus {
    let (status, reason, message) = match (state.initialized, state.sealed) {
        (true, false) => ("True", "Unsealed", "Vault is initialized and unsealed"),
        (true, true) => ("False", "Sealed", "Vault is sealed, waiting for transit auto-unseal"),
        (false, _) => ("False", "NotInitialized", "Vault is not initialized"),
    };

    let previous_ready = previous.and_then(|s| s.conditions.iter().find(|c| c.r#type == "Ready"));
    let last_transition_time = match previous_ready {
        Some(c) if c.status == status => c.last_transition_time.clone(),
        _ => Some(now.to_string()),
    };

    VaultTransitUnsealStatus {
        initialized: state.initialized,
        sealed: state.sealed,
        last_check_time: Some(now.to_string()),
        conditions: vec![Condition {
            r#type: "Ready".to_string(),
            status: status.to_string(),
            last_transition_time,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }],
    }
}

/// Delegate talking to the Kubernetes API and the Vault pods
pub struct VaultReconciler {
    client: Client,
    factory: Arc<dyn VaultClientFactory>,
    secrets: SecretManager,
}

impl std::fmt::Debug for VaultReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultReconciler").finish_non_exhaustive()
    }
}

impl VaultReconciler {
    #[must_use]
    pub fn new(client: Client, factory: Arc<dyn VaultClientFactory>, secrets: SecretManager) -> Self {
        Self {
            client,
            factory,
            secrets,
        }
    }

    async fn run(&self, resource: &VaultTransitUnseal) -> Result<Duration, OperatorError> {
        let check_interval = parse_kubernetes_duration(&resource.spec.monitoring.check_interval)?;
        let resource_ns = resource.namespace().unwrap_or_else(|| "default".to_string());
        let vault_ns = vault_namespace(resource);

        let secret_ref = &resource.spec.transit_vault.secret_ref;
        let token = Zeroizing::new(
            self.secrets
                .get(&resource_ns, &secret_ref.name, &secret_ref.key)
                .await?,
        );
        if token.is_empty() {
            return Err(OperatorError::config("transit token is empty")
                .with_context("namespace", &resource_ns)
                .with_context("name", &secret_ref.name)
                .with_context("key", &secret_ref.key));
        }

        let pods = self.running_pods(resource, &vault_ns).await?;
        let mut statuses = Vec::with_capacity(pods.len());
        for pod in &pods {
            statuses.push(self.seal_status(pod).await?);
        }
        let mut state = ObservedState::aggregate(&statuses);

        if !state.initialized {
            self.initialize(resource, &pods[0], &vault_ns).await?;
            state = ObservedState {
                initialized: true,
                ..state
            };
        }

        self.patch_status(resource, &resource_ns, state).await?;

        if state.sealed {
            return Err(OperatorError::transient("vault is sealed")
                .with_context("namespace", &vault_ns)
                .with_context("transit_address", &resource.spec.transit_vault.address));
        }

        debug!(
            check_interval_secs = check_interval.as_secs(),
            pods = pods.len(),
            "Vault is initialized and unsealed"
        );
        Ok(check_interval)
    }

    async fn running_pods(
        &self,
        resource: &VaultTransitUnseal,
        namespace: &str,
    ) -> Result<Vec<Pod>, OperatorError> {
        let selector = resource.spec.vault_pod.label_selector();
        if selector.is_empty() {
            return Err(OperatorError::config("vault pod selector is empty"));
        }

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| {
                OperatorError::transient("failed to list vault pods")
                    .with_source(e)
                    .with_context("namespace", namespace)
                    .with_context("selector", &selector)
            })?;

        let pods: Vec<Pod> = list.items.into_iter().filter(is_running_with_ip).collect();
        if pods.is_empty() {
            return Err(OperatorError::config("no running vault pods match selector")
                .with_context("namespace", namespace)
                .with_context("selector", &selector));
        }
        Ok(pods)
    }

    async fn seal_status(&self, pod: &Pod) -> Result<SealStatus, OperatorError> {
        let vault = self.factory.new_client_for_pod(pod).map_err(|e| {
            OperatorError::permanent("failed to build vault client")
                .with_source(e)
                .with_context("pod", pod.name_any())
        })?;
        vault.seal_status().await.map_err(|e| {
            OperatorError::transient("failed to read vault seal status")
                .with_source(e)
                .with_context("pod", pod.name_any())
        })
    }

    async fn initialize(
        &self,
        resource: &VaultTransitUnseal,
        pod: &Pod,
        namespace: &str,
    ) -> Result<(), OperatorError> {
        let init = &resource.spec.initialization;
        if init.recovery_threshold == 0 || init.recovery_threshold > init.recovery_shares {
            return Err(OperatorError::config("recovery threshold must be between 1 and recovery shares")
                .with_context("recovery_shares", init.recovery_shares)
                .with_context("recovery_threshold", init.recovery_threshold));
        }

        info!(pod = %pod.name_any(), "Vault is not initialized, initializing");
        let vault = self.factory.new_client_for_pod(pod).map_err(|e| {
            OperatorError::permanent("failed to build vault client")
                .with_source(e)
                .with_context("pod", pod.name_any())
        })?;
        let response = vault
            .initialize(&InitRequest {
                recovery_shares: init.recovery_shares,
                recovery_threshold: init.recovery_threshold,
            })
            .await
            .map_err(|e| {
                OperatorError::transient("failed to initialize vault")
                    .with_source(e)
                    .with_context("pod", pod.name_any())
            })?;

        persist_init_credentials(
            &self.secrets,
            &resource.spec.initialization.secret_names,
            namespace,
            &response,
        )
        .await?;
        info!(
            recovery_keys = response.recovery_keys.len(),
            "Vault initialized and credentials published"
        );
        Ok(())
    }

    async fn patch_status(
        &self,
        resource: &VaultTransitUnseal,
        namespace: &str,
        state: ObservedState,
    ) -> Result<(), OperatorError> {
        let status = desired_status(
            resource.status.as_ref(),
            state,
            &chrono::Utc::now().to_rfc3339(),
        );
        let api: Api<VaultTransitUnseal> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &resource.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(patch),
        )
        .await
        .map_err(|e| {
            OperatorError::transient("failed to update status")
                .with_source(e)
                .with_context("resource", format!("{namespace}/{}", resource.name_any()))
        })?;
        Ok(())
    }
}

/// Publish the admin token and recovery keys produced by initialization
///
/// Vault hands these out exactly once, so failed writes are retried
/// `PUBLISH_ATTEMPTS` times with doubling delays inside the invocation.
///
/// # Errors
///
/// Permanent error when the credentials could not be persisted.
pub async fn persist_init_credentials(
    secrets: &SecretManager,
    names: &SecretNames,
    namespace: &str,
    response: &InitResponse,
) -> Result<(), OperatorError> {
    let mut delay = PUBLISH_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match publish_init_secrets(secrets, names, namespace, response).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Transient && attempt < PUBLISH_ATTEMPTS => {
                warn!(
                    attempt,
                    retry_in_secs = delay.as_secs(),
                    "Publishing init credentials failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => {
                error!(
                    namespace,
                    admin_token_secret = %names.admin_token,
                    recovery_keys_secret = %names.recovery_keys,
                    attempts = attempt,
                    "Vault was initialized but its init credentials were NOT persisted: {}",
                    e
                );
                return Err(OperatorError::permanent(
                    "vault initialized but init credentials were not persisted",
                )
                .with_source(e)
                .with_context("namespace", namespace)
                .with_context("name", &names.admin_token));
            }
        }
    }
}

async fn publish_init_secrets(
    secrets: &SecretManager,
    names: &SecretNames,
    namespace: &str,
    response: &InitResponse,
) -> Result<(), OperatorError> {
    let mut annotations = names.admin_token_annotations.clone();
    annotations.insert(
        ANNOTATION_INITIALIZED_AT.to_string(),
        chrono::Utc::now().to_rfc3339(),
    );
    annotations.insert(ANNOTATION_MANAGED_BY.to_string(), MANAGED_BY.to_string());

    secrets
        .create_or_update_with_annotations(namespace, &names.admin_token, admin_token_data(response), &annotations)
        .await?;
    secrets
        .create_or_update(namespace, &names.recovery_keys, recovery_key_data(response))
        .await?;
    Ok(())
}

/// Admin token secret payload. Buffers are wiped by the secret manager.
fn admin_token_data(response: &InitResponse) -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([(
        ADMIN_TOKEN_KEY.to_string(),
        response.root_token.as_bytes().to_vec(),
    )])
}

/// Recovery keys secret payload: the root token plus one entry per key
fn recovery_key_data(response: &InitResponse) -> BTreeMap<String, Vec<u8>> {
    let mut data = BTreeMap::from([(
        ROOT_TOKEN_KEY.to_string(),
        response.root_token.as_bytes().to_vec(),
    )]);
    let keys = if response.recovery_keys_b64.is_empty() {
        &response.recovery_keys
    } else {
        &response.recovery_keys_b64
    };
    for (i, key) in keys.iter().enumerate() {
        data.insert(format!("recovery-key-{i}"), key.as_bytes().to_vec());
    }
    data
}

#[async_trait]
impl ReconcileDelegate for VaultReconciler {
    async fn reconcile(&self, resource: &VaultTransitUnseal) -> ReconcileResult {
        match self.run(resource).await {
            Ok(interval) => ReconcileResult::requeue_after(interval),
            Err(e) => {
                warn!(kind = e.kind().as_str(), "Vault reconciliation failed: {}", e);
                ReconcileResult::failed(e)
            }
        }
    }
}
