//! # VaultTransitUnseal Spec
//!
//! Desired auto-unseal configuration for one Vault installation.
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: vault.homelab.io/v1alpha1
//! kind: VaultTransitUnseal
//! metadata:
//!   name: vault
//!   namespace: vault
//! spec:
//!   vaultPod:
//!     namespace: vault
//!     selector:
//!       app.kubernetes.io/name: vault
//!   transitVault:
//!     address: https://transit-vault.example.com:8200
//!     secretRef:
//!       name: vault-transit-token
//!       key: token
//!   initialization:
//!     recoveryShares: 1
//!     recoveryThreshold: 1
//!   monitoring:
//!     checkInterval: 30s
//! ```

use super::status::VaultTransitUnsealStatus;
use crate::constants::DEFAULT_CHECK_INTERVAL;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "VaultTransitUnseal",
    group = "vault.homelab.io",
    version = "v1alpha1",
    namespaced,
    status = "VaultTransitUnsealStatus",
    shortname = "vtu",
    printcolumn = r#"{"name":"Initialized", "type":"boolean", "jsonPath":".status.initialized"}"#,
    printcolumn = r#"{"name":"Sealed", "type":"boolean", "jsonPath":".status.sealed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultTransitUnsealSpec {
    /// Which pods run the Vault instance to keep unsealed
    pub vault_pod: VaultPodConfig,
    /// Transit Vault providing the auto-unseal key
    pub transit_vault: TransitVaultConfig,
    /// How an uninitialized Vault is initialized
    #[serde(default)]
    pub initialization: InitializationConfig,
    /// Health check cadence
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultPodConfig {
    /// Namespace of the Vault pods. Defaults to the resource namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Label selector matching the Vault pods
    pub selector: BTreeMap<String, String>,
}

impl VaultPodConfig {
    /// Render the selector in `k=v,k2=v2` form for list calls
    #[must_use]
    pub fn label_selector(&self) -> String {
        self.selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransitVaultConfig {
    /// Address of the transit Vault
    pub address: String,
    /// Secret holding the token Vault uses to reach the transit engine
    pub secret_ref: SecretRef,
    /// Transit key name
    #[serde(default)]
    pub key_name: Option<String>,
    /// Transit engine mount path
    #[serde(default)]
    pub mount_path: Option<String>,
    #[serde(default)]
    pub tls_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializationConfig {
    #[serde(default = "default_recovery_shares")]
    pub recovery_shares: u8,
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u8,
    #[serde(default)]
    pub secret_names: SecretNames,
}

impl Default for InitializationConfig {
    fn default() -> Self {
        Self {
            recovery_shares: default_recovery_shares(),
            recovery_threshold: default_recovery_threshold(),
            secret_names: SecretNames::default(),
        }
    }
}

/// Names of the secrets the operator publishes after initializing Vault
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretNames {
    #[serde(default = "default_admin_token_secret")]
    pub admin_token: String,
    #[serde(default = "default_recovery_keys_secret")]
    pub recovery_keys: String,
    /// Extra annotations merged into the admin token secret
    /// (e.g. reflector annotations copying it to other namespaces)
    #[serde(default)]
    pub admin_token_annotations: BTreeMap<String, String>,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            admin_token: default_admin_token_secret(),
            recovery_keys: default_recovery_keys_secret(),
            admin_token_annotations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    /// Kubernetes duration between checks of a healthy Vault ("30s", "5m", ...)
    #[serde(default = "default_check_interval")]
    pub check_interval: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
        }
    }
}

#[must_use]
pub const fn default_recovery_shares() -> u8 {
    1
}

#[must_use]
pub const fn default_recovery_threshold() -> u8 {
    1
}

#[must_use]
pub fn default_check_interval() -> String {
    DEFAULT_CHECK_INTERVAL.to_string()
}

fn default_admin_token_secret() -> String {
    "vault-admin-token".to_string()
}

fn default_recovery_keys_secret() -> String {
    "vault-keys".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_spec_fills_defaults() {
        let spec: VaultTransitUnsealSpec = serde_json::from_value(serde_json::json!({
            "vaultPod": { "selector": { "app.kubernetes.io/name": "vault" } },
            "transitVault": {
                "address": "https://transit:8200",
                "secretRef": { "name": "vault-transit-token", "key": "token" }
            }
        }))
        .unwrap();

        assert_eq!(spec.initialization.recovery_shares, 1);
        assert_eq!(spec.initialization.recovery_threshold, 1);
        assert_eq!(spec.initialization.secret_names.admin_token, "vault-admin-token");
        assert_eq!(spec.initialization.secret_names.recovery_keys, "vault-keys");
        assert_eq!(spec.monitoring.check_interval, "30s");
        assert!(spec.vault_pod.namespace.is_none());
        assert!(!spec.transit_vault.tls_skip_verify);
    }

    #[test]
    fn test_label_selector_is_sorted_and_joined() {
        let pods = VaultPodConfig {
            namespace: None,
            selector: BTreeMap::from([
                ("component".to_string(), "server".to_string()),
                ("app.kubernetes.io/name".to_string(), "vault".to_string()),
            ]),
        };
        assert_eq!(
            pods.label_selector(),
            "app.kubernetes.io/name=vault,component=server"
        );
    }
}
