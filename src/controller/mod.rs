//! # Controller
//!
//! Core controller modules for the Vault Transit Unseal Operator.
//!
//! - `backoff`: bounded requeue delay for retryable errors
//! - `events`: Kubernetes warning events for failed invocations
//! - `reconciler`: fetch, delegate and classify one resource
//! - `secrets`: idempotent materialization of Kubernetes secrets

pub mod backoff;
pub mod events;
pub mod reconciler;
pub mod secrets;
