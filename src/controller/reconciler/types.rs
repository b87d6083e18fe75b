//! # Types
//!
//! Contracts between the reconciliation loop and its collaborators.

use crate::crd::{ObjectKey, VaultTransitUnseal};
use crate::errors::{BoxError, OperatorError};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one delegate invocation
///
/// Produced once per invocation and consumed immediately by the classifier.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub error: Option<OperatorError>,
    /// Suggested delay before the next run. Zero leaves scheduling to the
    /// next watch event or resync.
    pub requeue_after: Duration,
}

impl ReconcileResult {
    /// Success, run again after `requeue_after`
    #[must_use]
    pub const fn requeue_after(requeue_after: Duration) -> Self {
        Self {
            error: None,
            requeue_after,
        }
    }

    /// Success, wait for the next change
    #[must_use]
    pub const fn done() -> Self {
        Self::requeue_after(Duration::ZERO)
    }

    /// Failure with no suggested delay
    #[must_use]
    pub const fn failed(error: OperatorError) -> Self {
        Self {
            error: Some(error),
            requeue_after: Duration::ZERO,
        }
    }

    /// Failure with a suggested retry delay
    #[must_use]
    pub const fn failed_after(error: OperatorError, requeue_after: Duration) -> Self {
        Self {
            error: Some(error),
            requeue_after,
        }
    }
}

impl From<Result<Duration, OperatorError>> for ReconcileResult {
    fn from(result: Result<Duration, OperatorError>) -> Self {
        match result {
            Ok(requeue_after) => Self::requeue_after(requeue_after),
            Err(error) => Self::failed(error),
        }
    }
}

/// Domain reconciliation for one `VaultTransitUnseal`
///
/// The object is passed through untouched; the delegate reports everything it
/// wants the loop to know through the returned [`ReconcileResult`].
#[async_trait]
pub trait ReconcileDelegate: Send + Sync {
    async fn reconcile(&self, resource: &VaultTransitUnseal) -> ReconcileResult;
}

/// Identity-addressed read of the target resource
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// `Ok(None)` when the resource does not exist (deleted)
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<VaultTransitUnseal>, BoxError>;
}
