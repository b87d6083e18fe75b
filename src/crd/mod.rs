//! # Custom Resource Definitions
//!
//! CRD types for the Vault Transit Unseal operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `VaultTransitUnseal` specification and default values
//! - `status.rs` - Status types for tracking the observed Vault state
//! - `key.rs` - Namespaced identity used by the work queue

mod key;
mod spec;
mod status;

pub use key::ObjectKey;
pub use spec::{
    default_check_interval, default_recovery_shares, default_recovery_threshold,
    InitializationConfig, MonitoringConfig, SecretNames, SecretRef, TransitVaultConfig,
    VaultPodConfig, VaultTransitUnseal, VaultTransitUnsealSpec,
};
pub use status::{Condition, VaultTransitUnsealStatus};
