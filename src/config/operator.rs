//! # Operator Configuration
//!
//! Operator-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_CONFIG_ERROR_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MAX_CONCURRENT_RECONCILES,
    DEFAULT_METRICS_PORT, DEFAULT_MIN_BACKOFF_SECS, DEFAULT_PROBE_TIMEOUT_SECS,
    DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_VAULT_NAMESPACE, DEFAULT_VAULT_POD_SELECTOR,
    DEFAULT_VAULT_TIMEOUT_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration shared by reference between all components
pub type SharedOperatorConfig = Arc<OperatorConfig>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min backoff ({min:?}) must not exceed max backoff ({max:?})")]
    BackoffBounds { min: Duration, max: Duration },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Operator-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Verify TLS certificates when talking to Vault
    pub enable_tls_validation: bool,
    /// Timeout applied to every Vault API request
    pub default_vault_timeout: Duration,
    /// Backoff floor for retryable errors
    pub min_backoff: Duration,
    /// Backoff ceiling for retryable errors
    pub max_backoff: Duration,
    /// Maximum concurrent reconciliations across all resources
    pub max_concurrent_reconciles: usize,
    /// Consecutive configuration errors tolerated per resource before escalation.
    /// 0 retries configuration errors forever.
    pub config_error_max_attempts: u32,
    /// Interval at which every known resource is re-queued
    pub resync_interval: Duration,
    /// Deadline for one readiness probe
    pub probe_timeout: Duration,
    /// Delay before restarting the watch after a stream error
    pub watch_restart_delay: Duration,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Namespace to watch for `VaultTransitUnseal` resources (all if `None`)
    pub watch_namespace: Option<String>,
    /// Namespace of the Vault pods used by the readiness probe
    pub vault_namespace: String,
    /// Label selector of the Vault pods used by the readiness probe
    pub vault_pod_selector: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            enable_tls_validation: true,
            default_vault_timeout: Duration::from_secs(DEFAULT_VAULT_TIMEOUT_SECS),
            min_backoff: Duration::from_secs(DEFAULT_MIN_BACKOFF_SECS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            config_error_max_attempts: DEFAULT_CONFIG_ERROR_MAX_ATTEMPTS,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            watch_restart_delay: Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS),
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
            vault_namespace: DEFAULT_VAULT_NAMESPACE.to_string(),
            vault_pod_selector: DEFAULT_VAULT_POD_SELECTOR.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    ///
    /// Returns an error when the resulting values are inconsistent, see [`Self::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns an error when the resulting values are inconsistent, see [`Self::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            enable_tls_validation: bool_or_default(&lookup, "ENABLE_TLS_VALIDATION", true),
            default_vault_timeout: Duration::from_secs(or_default(
                &lookup,
                "DEFAULT_VAULT_TIMEOUT_SECS",
                DEFAULT_VAULT_TIMEOUT_SECS,
            )),
            min_backoff: Duration::from_secs(or_default(
                &lookup,
                "MIN_BACKOFF_SECS",
                DEFAULT_MIN_BACKOFF_SECS,
            )),
            max_backoff: Duration::from_secs(or_default(
                &lookup,
                "MAX_BACKOFF_SECS",
                DEFAULT_MAX_BACKOFF_SECS,
            )),
            max_concurrent_reconciles: or_default(
                &lookup,
                "MAX_CONCURRENT_RECONCILES",
                DEFAULT_MAX_CONCURRENT_RECONCILES,
            ),
            config_error_max_attempts: or_default(
                &lookup,
                "CONFIG_ERROR_MAX_ATTEMPTS",
                DEFAULT_CONFIG_ERROR_MAX_ATTEMPTS,
            ),
            resync_interval: Duration::from_secs(or_default(
                &lookup,
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            )),
            probe_timeout: Duration::from_secs(or_default(
                &lookup,
                "PROBE_TIMEOUT_SECS",
                DEFAULT_PROBE_TIMEOUT_SECS,
            )),
            watch_restart_delay: Duration::from_secs(or_default(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            )),
            metrics_port: or_default(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            vault_namespace: lookup("VAULT_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_VAULT_NAMESPACE.to_string()),
            vault_pod_selector: lookup("VAULT_POD_SELECTOR")
                .unwrap_or_else(|| DEFAULT_VAULT_POD_SELECTOR.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the scheduler cannot honor
    ///
    /// # Errors
    ///
    /// - [`ConfigError::BackoffBounds`] when `min_backoff > max_backoff`
    /// - [`ConfigError::Zero`] for a zero backoff floor, concurrency, resync interval or probe timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_backoff.is_zero() {
            return Err(ConfigError::Zero("MIN_BACKOFF_SECS"));
        }
        if self.min_backoff > self.max_backoff {
            return Err(ConfigError::BackoffBounds {
                min: self.min_backoff,
                max: self.max_backoff,
            });
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(ConfigError::Zero("MAX_CONCURRENT_RECONCILES"));
        }
        if self.resync_interval.is_zero() {
            return Err(ConfigError::Zero("RESYNC_INTERVAL_SECS"));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::Zero("PROBE_TIMEOUT_SECS"));
        }
        Ok(())
    }
}

/// Read a parseable value or return the default
fn or_default<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a boolean value or return the default
fn bool_or_default<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v_lower = v.trim().to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = OperatorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.min_backoff, Duration::from_secs(30));
        assert_eq!(config.max_backoff, Duration::from_secs(300));
        assert!(config.enable_tls_validation);
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = OperatorConfig::from_lookup(lookup_from(&[
            ("ENABLE_TLS_VALIDATION", "false"),
            ("MIN_BACKOFF_SECS", "5"),
            ("MAX_BACKOFF_SECS", "60"),
            ("MAX_CONCURRENT_RECONCILES", "8"),
            ("WATCH_NAMESPACE", "vault"),
            ("CONFIG_ERROR_MAX_ATTEMPTS", "0"),
        ]))
        .unwrap();
        assert!(!config.enable_tls_validation);
        assert_eq!(config.min_backoff, Duration::from_secs(5));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.max_concurrent_reconciles, 8);
        assert_eq!(config.watch_namespace.as_deref(), Some("vault"));
        assert_eq!(config.config_error_max_attempts, 0);
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let config =
            OperatorConfig::from_lookup(lookup_from(&[("MIN_BACKOFF_SECS", "soon")])).unwrap();
        assert_eq!(config.min_backoff, Duration::from_secs(DEFAULT_MIN_BACKOFF_SECS));
    }

    #[test]
    fn test_inverted_backoff_bounds_are_rejected() {
        let err = OperatorConfig::from_lookup(lookup_from(&[
            ("MIN_BACKOFF_SECS", "600"),
            ("MAX_BACKOFF_SECS", "60"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::BackoffBounds { .. }));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = OperatorConfig::from_lookup(lookup_from(&[("MAX_CONCURRENT_RECONCILES", "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("MAX_CONCURRENT_RECONCILES"));
    }
}
