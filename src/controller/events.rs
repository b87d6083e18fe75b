//! # Failure Events
//!
//! Publishes Kubernetes `Warning` events for invocations that end in failure,
//! so they show up in `kubectl describe vaulttransitunseal`.

use crate::constants::MANAGED_BY;
use crate::crd::{ObjectKey, VaultTransitUnseal};
use crate::errors::OperatorError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Maximum note length accepted by the events API
const MAX_NOTE_LEN: usize = 1024;

/// Why an invocation failed, used as the event reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The resource could not be read
    FetchFailed,
    /// Config error retried past its attempt limit
    ConfigErrorEscalated,
    /// Permanent error reported by the delegate
    ReconcileFailed,
}

impl FailureReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FetchFailed => "FetchFailed",
            Self::ConfigErrorEscalated => "ConfigErrorEscalated",
            Self::ReconcileFailed => "ReconcileFailed",
        }
    }

    /// Reason for an error the classifier gave up on
    #[must_use]
    pub fn of_classified(err: &OperatorError) -> Self {
        if err.context().contains_key("escalated_from") {
            Self::ConfigErrorEscalated
        } else {
            Self::ReconcileFailed
        }
    }
}

/// Sink for failed invocations
#[async_trait]
pub trait FailureRecorder: Send + Sync {
    /// Record a failure. Never fails; publishing problems are logged.
    async fn record(&self, key: &ObjectKey, reason: FailureReason, err: &OperatorError);
}

/// Publishes failures through the Kubernetes events API
pub struct KubeFailureRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeFailureRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeFailureRecorder").finish_non_exhaustive()
    }
}

impl KubeFailureRecorder {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: MANAGED_BY.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

/// Reference to the `VaultTransitUnseal` identified by `key`
#[must_use]
pub fn object_reference(key: &ObjectKey) -> ObjectReference {
    ObjectReference {
        api_version: Some(VaultTransitUnseal::api_version(&()).into_owned()),
        kind: Some(VaultTransitUnseal::kind(&()).into_owned()),
        namespace: Some(key.namespace.clone()),
        name: Some(key.name.clone()),
        ..ObjectReference::default()
    }
}

/// Event note: the error text, cut to the API limit on a char boundary
#[must_use]
pub fn event_note(err: &OperatorError) -> String {
    let mut note = err.to_string();
    if note.len() > MAX_NOTE_LEN {
        let mut end = MAX_NOTE_LEN;
        while !note.is_char_boundary(end) {
            end -= 1;
        }
        note.truncate(end);
    }
    note
}

#[async_trait]
impl FailureRecorder for KubeFailureRecorder {
    async fn record(&self, key: &ObjectKey, reason: FailureReason, err: &OperatorError) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.as_str().to_string(),
            note: Some(event_note(err)),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &object_reference(key)).await {
            warn!(resource = %key, "Failed to publish failure event: {}", e);
        }
    }
}
