//! # Reconciler
//!
//! Reconciliation loop for `VaultTransitUnseal` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Fetch the resource by identity (absent means deleted: done, no requeue)
//! 2. Hand it to the [`ReconcileDelegate`]
//! 3. Classify the [`ReconcileResult`] into an [`Outcome`]
//!
//! The three steps run sequentially within one invocation; the work queue
//! guarantees no two invocations for the same identity overlap.

pub mod types;
pub mod vault;

pub use types::{ReconcileDelegate, ReconcileResult, ResourceFetcher};
pub use vault::VaultReconciler;

use crate::controller::events::{FailureReason, FailureRecorder};
use crate::crd::{ObjectKey, VaultTransitUnseal};
use crate::errors::{BoxError, OperatorError};
use crate::observability::metrics;
use crate::runtime::error_policy::{Outcome, OutcomeClassifier};
use async_trait::async_trait;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, Instrument};

/// Reads `VaultTransitUnseal` objects from the API server
#[derive(Clone)]
pub struct KubeResourceFetcher {
    client: Client,
}

impl std::fmt::Debug for KubeResourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceFetcher").finish_non_exhaustive()
    }
}

impl KubeResourceFetcher {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for KubeResourceFetcher {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<VaultTransitUnseal>, BoxError> {
        let api: Api<VaultTransitUnseal> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }
}

/// One reconciliation invocation: fetch, delegate, classify
pub struct Reconciler {
    fetcher: Arc<dyn ResourceFetcher>,
    delegate: Arc<dyn ReconcileDelegate>,
    classifier: OutcomeClassifier,
    failures: Option<Arc<dyn FailureRecorder>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        delegate: Arc<dyn ReconcileDelegate>,
        classifier: OutcomeClassifier,
    ) -> Self {
        Self {
            fetcher,
            delegate,
            classifier,
            failures: None,
        }
    }

    /// Report failed invocations to `recorder`
    #[must_use]
    pub fn with_failure_recorder(mut self, recorder: Arc<dyn FailureRecorder>) -> Self {
        self.failures = Some(recorder);
        self
    }

    #[must_use]
    pub const fn classifier(&self) -> &OutcomeClassifier {
        &self.classifier
    }

    /// Run one invocation for `key`
    pub async fn reconcile(&self, key: &ObjectKey) -> Outcome {
        let span = info_span!(
            "controller.reconcile",
            resource = %key,
            trace_id = %uuid::Uuid::new_v4()
        );
        self.reconcile_inner(key).instrument(span).await
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Outcome {
        let start = Instant::now();
        debug!("Starting reconciliation");
        metrics::increment_reconciliations();

        let resource = match self.fetcher.fetch(key).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                debug!("Resource not found, likely deleted");
                self.classifier.forget(key);
                return Outcome::AwaitChange;
            }
            Err(e) => {
                let err = OperatorError::transient("failed to get VaultTransitUnseal")
                    .with_source(e)
                    .with_context("resource", key);
                tracing::error!(context = ?err.context(), "Fetch failed: {}", err);
                metrics::increment_reconciliation_errors();
                self.report(key, FailureReason::FetchFailed, &err).await;
                return Outcome::Failed(err);
            }
        };

        let result = self.delegate.reconcile(&resource).await;
        let outcome = self.classifier.classify(key, result);

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        match &outcome {
            Outcome::Failed(err) => {
                metrics::increment_reconciliation_errors();
                self.report(key, FailureReason::of_classified(err), err).await;
            }
            Outcome::Requeue { after, .. } => {
                debug!(
                    requeue_after_secs = after.as_secs(),
                    "Reconciliation completed"
                );
            }
            Outcome::AwaitChange => debug!("Reconciliation completed"),
        }
        outcome
    }

    async fn report(&self, key: &ObjectKey, reason: FailureReason, err: &OperatorError) {
        if let Some(failures) = &self.failures {
            failures.record(key, reason, err).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backoff::BackoffPolicy;
    use crate::crd::VaultTransitUnsealSpec;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeFetcher {
        response: Mutex<Option<Result<Option<VaultTransitUnseal>, BoxError>>>,
    }

    impl FakeFetcher {
        fn returning(response: Result<Option<VaultTransitUnseal>, BoxError>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
            })
        }
    }

    #[async_trait]
    impl ResourceFetcher for FakeFetcher {
        async fn fetch(&self, _key: &ObjectKey) -> Result<Option<VaultTransitUnseal>, BoxError> {
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(None))
        }
    }

    struct FakeDelegate {
        calls: AtomicUsize,
        result: fn() -> ReconcileResult,
    }

    #[async_trait]
    impl ReconcileDelegate for FakeDelegate {
        async fn reconcile(&self, _resource: &VaultTransitUnseal) -> ReconcileResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn resource() -> VaultTransitUnseal {
        let spec: VaultTransitUnsealSpec = serde_json::from_value(serde_json::json!({
            "vaultPod": { "selector": { "app": "vault" } },
            "transitVault": {
                "address": "https://transit:8200",
                "secretRef": { "name": "transit-token", "key": "token" }
            }
        }))
        .unwrap();
        let mut vtu = VaultTransitUnseal::new("vault", spec);
        vtu.metadata.namespace = Some("vault".to_string());
        vtu
    }

    fn reconciler(
        fetcher: Arc<dyn ResourceFetcher>,
        result: fn() -> ReconcileResult,
    ) -> (Reconciler, Arc<FakeDelegate>) {
        let delegate = Arc::new(FakeDelegate {
            calls: AtomicUsize::new(0),
            result,
        });
        let classifier = OutcomeClassifier::new(
            BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(300)),
            0,
        );
        (
            Reconciler::new(fetcher, Arc::clone(&delegate) as Arc<dyn ReconcileDelegate>, classifier),
            delegate,
        )
    }

    #[tokio::test]
    async fn test_absent_resource_is_terminal_success() {
        let (reconciler, delegate) = reconciler(FakeFetcher::returning(Ok(None)), ReconcileResult::done);
        let outcome = reconciler.reconcile(&ObjectKey::new("vault", "gone")).await;

        assert!(matches!(outcome, Outcome::AwaitChange));
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_transient_with_resource_context() {
        let (reconciler, delegate) = reconciler(
            FakeFetcher::returning(Err("connection refused".into())),
            ReconcileResult::done,
        );
        let outcome = reconciler.reconcile(&ObjectKey::new("vault", "vault")).await;

        match outcome {
            Outcome::Failed(err) => {
                assert_eq!(err.kind(), ErrorKind::Transient);
                assert_eq!(
                    err.context().get("resource").map(String::as_str),
                    Some("vault/vault")
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delegate_result_is_classified() {
        let (reconciler, delegate) = reconciler(FakeFetcher::returning(Ok(Some(resource()))), || {
            ReconcileResult::failed_after(OperatorError::transient("sealed"), Duration::from_secs(45))
        });
        let outcome = reconciler.reconcile(&ObjectKey::new("vault", "vault")).await;

        assert_eq!(outcome.requeue_after(), Some(Duration::from_secs(45)));
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_healthy_delegate_requeues_on_its_interval() {
        let (reconciler, _) = reconciler(FakeFetcher::returning(Ok(Some(resource()))), || {
            ReconcileResult::requeue_after(Duration::from_secs(30))
        });
        let outcome = reconciler.reconcile(&ObjectKey::new("vault", "vault")).await;
        assert_eq!(outcome.requeue_after(), Some(Duration::from_secs(30)));
    }

    #[derive(Default)]
    struct RecordingFailures {
        recorded: Mutex<Vec<(ObjectKey, FailureReason)>>,
    }

    #[async_trait]
    impl FailureRecorder for RecordingFailures {
        async fn record(&self, key: &ObjectKey, reason: FailureReason, _err: &OperatorError) {
            self.recorded.lock().unwrap().push((key.clone(), reason));
        }
    }

    #[tokio::test]
    async fn test_failures_are_recorded_with_reason() {
        let key = ObjectKey::new("vault", "vault");
        let failures = Arc::new(RecordingFailures::default());

        let (fetch_fails, _) = reconciler(
            FakeFetcher::returning(Err("connection refused".into())),
            ReconcileResult::done,
        );
        let fetch_fails =
            fetch_fails.with_failure_recorder(Arc::clone(&failures) as Arc<dyn FailureRecorder>);
        fetch_fails.reconcile(&key).await;

        let (permanent, _) = reconciler(FakeFetcher::returning(Ok(Some(resource()))), || {
            ReconcileResult::failed(OperatorError::permanent("invalid pod address"))
        });
        let permanent =
            permanent.with_failure_recorder(Arc::clone(&failures) as Arc<dyn FailureRecorder>);
        permanent.reconcile(&key).await;

        assert_eq!(
            *failures.recorded.lock().unwrap(),
            vec![
                (key.clone(), FailureReason::FetchFailed),
                (key, FailureReason::ReconcileFailed),
            ]
        );
    }

    #[tokio::test]
    async fn test_escalation_is_recorded_but_retries_are_not() {
        let key = ObjectKey::new("vault", "vault");
        let failures = Arc::new(RecordingFailures::default());
        let fetcher: Arc<dyn ResourceFetcher> = Arc::new(AlwaysPresent);
        let delegate: Arc<dyn ReconcileDelegate> = Arc::new(FakeDelegate {
            calls: AtomicUsize::new(0),
            result: || ReconcileResult::failed(OperatorError::config("secret not found")),
        });
        let classifier = OutcomeClassifier::new(
            BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(300)),
            2,
        );
        let reconciler = Reconciler::new(fetcher, delegate, classifier)
            .with_failure_recorder(Arc::clone(&failures) as Arc<dyn FailureRecorder>);

        assert!(!reconciler.reconcile(&key).await.is_failure());
        assert!(failures.recorded.lock().unwrap().is_empty());

        assert!(reconciler.reconcile(&key).await.is_failure());
        assert_eq!(
            *failures.recorded.lock().unwrap(),
            vec![(key, FailureReason::ConfigErrorEscalated)]
        );
    }

    struct AlwaysPresent;

    #[async_trait]
    impl ResourceFetcher for AlwaysPresent {
        async fn fetch(&self, _key: &ObjectKey) -> Result<Option<VaultTransitUnseal>, BoxError> {
            Ok(Some(resource()))
        }
    }
}
