//! # Client Factory
//!
//! Builds one short-lived [`VaultClient`] per Vault pod, addressed at the pod
//! IP on the fixed Vault API port.

use super::client::{VaultClient, VaultClientConfig, VaultClientError};
use crate::config::OperatorConfig;
use crate::constants::VAULT_API_PORT;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::net::IpAddr;
use std::time::Duration;

/// Construction of per-pod Vault clients
pub trait VaultClientFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns the construction error as-is; callers decide how to classify it.
    fn new_client_for_pod(&self, pod: &Pod) -> Result<VaultClient, VaultClientError>;
}

/// Factory holding the two process-wide client settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodClientFactory {
    tls_skip_verify: bool,
    timeout: Duration,
}

impl PodClientFactory {
    #[must_use]
    pub const fn new(tls_skip_verify: bool, timeout: Duration) -> Self {
        Self {
            tls_skip_verify,
            timeout,
        }
    }

    #[must_use]
    pub const fn from_config(config: &OperatorConfig) -> Self {
        Self::new(!config.enable_tls_validation, config.default_vault_timeout)
    }

    #[must_use]
    pub const fn tls_skip_verify(&self) -> bool {
        self.tls_skip_verify
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Vault API address for a pod IP
    #[must_use]
    pub fn address_for(pod_ip: &str) -> String {
        match pod_ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("http://[{ip}]:{VAULT_API_PORT}"),
            _ => format!("http://{pod_ip}:{VAULT_API_PORT}"),
        }
    }

    /// Build a client for an explicit address with this factory's settings
    ///
    /// # Errors
    ///
    /// See [`VaultClient::new`].
    pub fn new_client(&self, address: String) -> Result<VaultClient, VaultClientError> {
        VaultClient::new(&VaultClientConfig {
            address,
            tls_skip_verify: self.tls_skip_verify,
            timeout: self.timeout,
        })
    }
}

impl VaultClientFactory for PodClientFactory {
    fn new_client_for_pod(&self, pod: &Pod) -> Result<VaultClient, VaultClientError> {
        let pod_ip = pod
            .status
            .as_ref()
            .and_then(|status| status.pod_ip.as_deref())
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| VaultClientError::MissingPodIp {
                pod: pod.name_any(),
            })?;
        self.new_client(Self::address_for(pod_ip))
    }
}
