//! # Scheduler
//!
//! Dispatches ready identities from the [`WorkQueue`] to a bounded pool of
//! worker tasks and feeds each [`Outcome`] back into the queue.
//!
//! - At most `max_concurrent_reconciles` invocations run at once
//! - An identity is released from the queue only after its outcome has been
//!   applied, so a requeue and a concurrent watch event collapse into one run
//! - Every `resync_interval` all known identities are queued again

use crate::config::OperatorConfig;
use crate::controller::reconciler::Reconciler;
use crate::crd::ObjectKey;
use crate::observability::metrics;
use crate::runtime::error_policy::Outcome;
use crate::runtime::queue::WorkQueue;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Releases an identity from the queue when the worker ends, panics included
struct InFlight {
    queue: Arc<WorkQueue>,
    key: ObjectKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

/// Apply one invocation's scheduling decision to the queue
pub fn apply_outcome(queue: &WorkQueue, key: &ObjectKey, outcome: &Outcome) {
    match outcome {
        Outcome::Requeue { after, reason } => {
            metrics::increment_requeues_total(reason.as_str());
            queue.add_after(key.clone(), *after);
        }
        Outcome::AwaitChange | Outcome::Failed(_) => {}
    }
}

pub struct Scheduler {
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    semaphore: Arc<Semaphore>,
    resync_interval: Duration,
    alive: Arc<AtomicBool>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("available_permits", &self.semaphore.available_permits())
            .field("resync_interval", &self.resync_interval)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(
        queue: Arc<WorkQueue>,
        reconciler: Arc<Reconciler>,
        max_concurrent_reconciles: usize,
        resync_interval: Duration,
    ) -> Self {
        Self {
            queue,
            reconciler,
            semaphore: Arc::new(Semaphore::new(max_concurrent_reconciles)),
            resync_interval,
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn from_config(
        config: &OperatorConfig,
        queue: Arc<WorkQueue>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self::new(
            queue,
            reconciler,
            config.max_concurrent_reconciles,
            config.resync_interval,
        )
    }

    /// Flag raised while [`Self::run`] is looping; shared with liveness
    #[must_use]
    pub fn alive(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Run until `shutdown` resolves, then wait for in-flight invocations
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut resync = tokio::time::interval_at(
            Instant::now() + self.resync_interval,
            self.resync_interval,
        );
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut workers = JoinSet::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;

        self.alive.store(true, Ordering::Relaxed);
        info!(
            max_concurrent = self.semaphore.available_permits(),
            resync_interval_secs = self.resync_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = resync.tick() => {
                    let count = self.queue.resync();
                    debug!(count, "Periodic resync queued known resources");
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Reconciliation worker ended abnormally: {}", e);
                    }
                }
                acquired = Arc::clone(&self.semaphore).acquire_owned(), if permit.is_none() => {
                    match acquired {
                        Ok(acquired) => permit = Some(acquired),
                        Err(_closed) => break,
                    }
                }
                key = self.queue.next(), if permit.is_some() => {
                    let permit = permit.take();
                    let guard = InFlight {
                        queue: Arc::clone(&self.queue),
                        key,
                    };
                    let reconciler = Arc::clone(&self.reconciler);
                    workers.spawn(async move {
                        let _permit = permit;
                        let outcome = reconciler.reconcile(&guard.key).await;
                        apply_outcome(&guard.queue, &guard.key, &outcome);
                    });
                }
            }
        }

        self.alive.store(false, Ordering::Relaxed);
        info!(in_flight = workers.len(), "Scheduler stopping, waiting for in-flight reconciliations");
        while workers.join_next().await.is_some() {}
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backoff::BackoffPolicy;
    use crate::controller::reconciler::{ReconcileDelegate, ReconcileResult, ResourceFetcher};
    use crate::crd::{VaultTransitUnseal, VaultTransitUnsealSpec};
    use crate::errors::{BoxError, OperatorError};
    use crate::runtime::error_policy::{OutcomeClassifier, RequeueReason};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysPresent;

    #[async_trait]
    impl ResourceFetcher for AlwaysPresent {
        async fn fetch(&self, key: &ObjectKey) -> Result<Option<VaultTransitUnseal>, BoxError> {
            let spec: VaultTransitUnsealSpec = serde_json::from_value(serde_json::json!({
                "vaultPod": { "selector": { "app": "vault" } },
                "transitVault": {
                    "address": "https://transit:8200",
                    "secretRef": { "name": "transit-token", "key": "token" }
                }
            }))?;
            let mut vtu = VaultTransitUnseal::new(&key.name, spec);
            vtu.metadata.namespace = Some(key.namespace.clone());
            Ok(Some(vtu))
        }
    }

    #[derive(Default)]
    struct SlowDelegate {
        running: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReconcileDelegate for SlowDelegate {
        async fn reconcile(&self, _resource: &VaultTransitUnseal) -> ReconcileResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ReconcileResult::done()
        }
    }

    fn scheduler(delegate: Arc<SlowDelegate>, queue: Arc<WorkQueue>, workers: usize) -> Scheduler {
        let classifier = OutcomeClassifier::new(
            BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(300)),
            10,
        );
        let reconciler = Reconciler::new(Arc::new(AlwaysPresent), delegate, classifier);
        Scheduler::new(queue, Arc::new(reconciler), workers, Duration::from_secs(600))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..6 {
            queue.add(ObjectKey::new("vault", format!("vault-{i}")));
        }
        let delegate = Arc::new(SlowDelegate::default());
        let scheduler = scheduler(Arc::clone(&delegate), Arc::clone(&queue), 2);

        scheduler
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(delegate.calls.load(Ordering::SeqCst), 6);
        assert_eq!(delegate.peak.load(Ordering::SeqCst), 2);
        assert!(!scheduler.alive().load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_reruns_known_resources() {
        let queue = Arc::new(WorkQueue::new());
        let key = ObjectKey::new("vault", "vault");
        queue.track(key.clone());
        queue.add(key);
        let delegate = Arc::new(SlowDelegate::default());
        let scheduler = scheduler(Arc::clone(&delegate), Arc::clone(&queue), 3);

        // First run at t=0, resyncs at t=600 and t=1200
        scheduler
            .run(tokio::time::sleep(Duration::from_secs(1250)))
            .await;

        assert_eq!(delegate.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_requeue_outcome_schedules_identity() {
        let queue = WorkQueue::new();
        let key = ObjectKey::new("vault", "vault");
        apply_outcome(
            &queue,
            &key,
            &Outcome::Requeue {
                after: Duration::from_secs(45),
                reason: RequeueReason::ErrorBackoff,
            },
        );
        assert!(queue.pending_at(&key).is_some());
    }

    #[test]
    fn test_failed_outcome_schedules_nothing() {
        let queue = WorkQueue::new();
        let key = ObjectKey::new("vault", "vault");
        apply_outcome(&queue, &key, &Outcome::Failed(OperatorError::permanent("bad")));
        apply_outcome(&queue, &key, &Outcome::AwaitChange);
        assert_eq!(queue.pending_len(), 0);
    }
}
