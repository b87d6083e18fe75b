//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable.

/// Port the Vault API listens on inside every Vault pod
pub const VAULT_API_PORT: u16 = 8200;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default timeout for a single Vault API request (seconds)
pub const DEFAULT_VAULT_TIMEOUT_SECS: u64 = 10;

/// Default backoff floor for retryable reconciliation errors (seconds)
pub const DEFAULT_MIN_BACKOFF_SECS: u64 = 30;

/// Default backoff ceiling for retryable reconciliation errors (seconds)
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;

/// Default ceiling on concurrently running reconciliations
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 3;

/// Default number of consecutive configuration errors tolerated per resource
/// before the error is escalated to permanent (0 disables escalation)
pub const DEFAULT_CONFIG_ERROR_MAX_ATTEMPTS: u32 = 10;

/// Default interval at which every known resource is re-queued (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Default deadline for a single readiness probe (seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default delay before restarting the watch stream after an error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default namespace holding the Vault pods probed for readiness
pub const DEFAULT_VAULT_NAMESPACE: &str = "vault";

/// Default label selector for Vault pods
pub const DEFAULT_VAULT_POD_SELECTOR: &str = "app.kubernetes.io/name=vault";

/// Default interval between health checks of a healthy Vault
pub const DEFAULT_CHECK_INTERVAL: &str = "30s";

/// Annotation recording when the operator initialized Vault
pub const ANNOTATION_INITIALIZED_AT: &str = "vault.homelab.io/initialized-at";

/// Annotation recording which operator wrote a managed secret
pub const ANNOTATION_MANAGED_BY: &str = "vault.homelab.io/managed-by";

/// Value written to [`ANNOTATION_MANAGED_BY`]
pub const MANAGED_BY: &str = "vault-transit-unseal-operator";
