//! # Prelude
//!
//! Re-exports commonly used types and traits.

pub use crate::crd::*;

pub use crate::controller::reconciler::{
    ReconcileDelegate, ReconcileResult, Reconciler, ResourceFetcher, VaultReconciler,
};
pub use crate::controller::secrets::{SecretManager, SecretOperation, SecretStore};

pub use crate::config::{OperatorConfig, SharedOperatorConfig};

pub use crate::errors::{ErrorKind, OperatorError};

pub use crate::health::{HealthChecker, HealthError, StatusProbe};
pub use crate::runtime::error_policy::{Outcome, OutcomeClassifier};
pub use crate::runtime::queue::WorkQueue;
pub use crate::vault::{PodClientFactory, VaultClient, VaultClientFactory};
