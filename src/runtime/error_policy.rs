//! # Error Policy
//!
//! Turns a [`ReconcileResult`] into a scheduling decision.
//!
//! - Success requeues after the delegate's suggestion (zero waits for the next change)
//! - Transient and config errors requeue after the bounded backoff and are
//!   reported as success-with-requeue, so no second backoff stacks on top
//! - Permanent errors are reported as failures and never requeued
//!
//! Config errors are escalated to permanent after `config_error_max_attempts`
//! config errors for the same resource without a success in between. The
//! counter lives in memory, keyed by resource identity, and is cleared by any
//! successful outcome or by the resource disappearing.

use crate::config::OperatorConfig;
use crate::controller::backoff::BackoffPolicy;
use crate::controller::reconciler::ReconcileResult;
use crate::crd::ObjectKey;
use crate::errors::{ErrorKind, OperatorError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Why an invocation was requeued, used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    /// Successful run asked to be checked again later
    Scheduled,
    /// Retryable error backoff
    ErrorBackoff,
}

impl RequeueReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::ErrorBackoff => "error-backoff",
        }
    }
}

/// Scheduling decision for one invocation
#[derive(Debug)]
pub enum Outcome {
    /// Success, run again after the delay
    Requeue {
        after: Duration,
        reason: RequeueReason,
    },
    /// Success, nothing scheduled until the next change or resync
    AwaitChange,
    /// Failure, nothing scheduled by this loop
    Failed(OperatorError),
}

impl Outcome {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Requeue delay, if any
    #[must_use]
    pub const fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Requeue { after, .. } => Some(*after),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct OutcomeClassifier {
    policy: BackoffPolicy,
    config_error_max_attempts: u32,
    config_attempts: Mutex<HashMap<ObjectKey, u32>>,
}

impl OutcomeClassifier {
    #[must_use]
    pub fn new(policy: BackoffPolicy, config_error_max_attempts: u32) -> Self {
        Self {
            policy,
            config_error_max_attempts,
            config_attempts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(
            BackoffPolicy::from_config(config),
            config.config_error_max_attempts,
        )
    }

    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn classify(&self, key: &ObjectKey, result: ReconcileResult) -> Outcome {
        let Some(err) = result.error else {
            self.forget(key);
            if result.requeue_after.is_zero() {
                return Outcome::AwaitChange;
            }
            return Outcome::Requeue {
                after: result.requeue_after,
                reason: RequeueReason::Scheduled,
            };
        };

        let err = match err.kind() {
            ErrorKind::Config => self.record_config_error(key, err),
            ErrorKind::Transient | ErrorKind::Permanent => err,
        };

        if !err.should_retry() {
            error!(
                resource = %key,
                kind = %err.kind(),
                context = ?err.context(),
                "Reconciliation failed permanently, not retrying: {}",
                err
            );
            self.forget(key);
            return Outcome::Failed(err);
        }

        let after = self.policy.requeue_delay(result.requeue_after);
        warn!(
            resource = %key,
            kind = %err.kind(),
            context = ?err.context(),
            requeue_after_secs = after.as_secs(),
            "Reconciliation failed, retrying: {}",
            err
        );
        Outcome::Requeue {
            after,
            reason: RequeueReason::ErrorBackoff,
        }
    }

    /// Clear per-resource attempt tracking
    pub fn forget(&self, key: &ObjectKey) {
        self.lock_attempts().remove(key);
    }

    /// Consecutive config errors recorded for `key`
    #[must_use]
    pub fn config_attempts(&self, key: &ObjectKey) -> u32 {
        self.lock_attempts().get(key).copied().unwrap_or(0)
    }

    fn record_config_error(&self, key: &ObjectKey, err: OperatorError) -> OperatorError {
        let mut attempts = self.lock_attempts();
        let count = attempts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        drop(attempts);

        if self.config_error_max_attempts == 0 || count < self.config_error_max_attempts {
            debug!(resource = %key, attempt = count, "Config error recorded");
            return err;
        }
        err.with_context("attempts", count).escalate()
    }

    fn lock_attempts(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectKey, u32>> {
        self.config_attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
