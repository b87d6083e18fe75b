//! # Backoff Policy
//!
//! Bounded requeue delay for retryable reconciliation errors.
//!
//! The delegate may suggest a delay; the policy clamps it into
//! `[min_backoff, max_backoff]`. A zero suggestion never produces a tight
//! retry loop, it yields the floor instead.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use vault_transit_unseal_operator::controller::backoff::BackoffPolicy;
//!
//! let policy = BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(300));
//! assert_eq!(policy.requeue_delay(Duration::ZERO), Duration::from_secs(30));
//! assert_eq!(policy.requeue_delay(Duration::from_secs(45)), Duration::from_secs(45));
//! assert_eq!(policy.requeue_delay(Duration::from_secs(600)), Duration::from_secs(300));
//! ```

use crate::config::OperatorConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min_backoff: Duration,
    max_backoff: Duration,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff,
        }
    }

    #[must_use]
    pub const fn from_config(config: &OperatorConfig) -> Self {
        Self::new(config.min_backoff, config.max_backoff)
    }

    #[must_use]
    pub const fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Delay before retrying an attempt whose delegate suggested `suggested`
    ///
    /// `clamp(max(suggested, min), max)`, or `min` when nothing was suggested.
    #[must_use]
    pub fn requeue_delay(&self, suggested: Duration) -> Duration {
        if suggested.is_zero() {
            return self.min_backoff;
        }
        suggested.max(self.min_backoff).min(self.max_backoff)
    }
}
