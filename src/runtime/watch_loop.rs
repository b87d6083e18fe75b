//! # Watch Loop
//!
//! Watches `VaultTransitUnseal` resources and feeds their identities into the
//! [`WorkQueue`]. The watch restarts after `watch_restart_delay` whenever its
//! stream ends.

use crate::crd::{ObjectKey, VaultTransitUnseal};
use crate::runtime::queue::WorkQueue;
use futures::StreamExt;
use kube::Api;
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Broad cause of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old, the watcher relists
    Expired,
    /// 429: API server throttling or storage reinitializing
    Throttled,
    /// 404: CRD missing or deleted
    NotFound,
    Other,
}

/// Classify a rendered watch error
///
/// Not-found is checked first as a 404 body can surface wrapped in other
/// failure text.
#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorClass {
    let is_not_found =
        error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
    if is_not_found {
        WatchErrorClass::NotFound
    } else if error.contains("401") || error.contains("Unauthorized") {
        WatchErrorClass::Unauthorized
    } else if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        WatchErrorClass::Expired
    } else if error.contains("429")
        || error.contains("storage is (re)initializing")
        || error.contains("TooManyRequests")
    {
        WatchErrorClass::Throttled
    } else {
        WatchErrorClass::Other
    }
}

/// Translates watcher events into queue operations
///
/// An identity is queued when it is first seen or its `metadata.generation`
/// moved. Updates that keep the generation (status writes, label edits) are
/// ignored so the operator's own status patches do not cut a pending backoff
/// short. Objects without a generation are always queued.
///
/// Relist events are buffered so identities deleted while the watch was
/// down can be dropped from the known set once the relist completes.
#[derive(Debug)]
pub struct EventHandler {
    queue: Arc<WorkQueue>,
    generations: HashMap<ObjectKey, i64>,
    relist: Option<BTreeSet<ObjectKey>>,
}

impl EventHandler {
    #[must_use]
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self {
            queue,
            generations: HashMap::new(),
            relist: None,
        }
    }

    pub fn handle(&mut self, event: Event<VaultTransitUnseal>) {
        match event {
            Event::Apply(resource) => {
                let key = self.observe(&resource);
                debug!(resource = %key, "watch.event.apply");
            }
            Event::Delete(resource) => {
                let key = ObjectKey::from_resource(&resource);
                debug!(resource = %key, "watch.event.delete");
                self.generations.remove(&key);
                self.queue.untrack(&key);
                self.queue.add(key);
            }
            Event::Init => {
                debug!("watch.event.relist_started");
                self.relist = Some(BTreeSet::new());
            }
            Event::InitApply(resource) => {
                let key = self.observe(&resource);
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(key);
                }
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return;
                };
                let count = seen.len();
                let vanished = self.queue.replace_known(seen);
                for key in vanished {
                    debug!(resource = %key, "Resource vanished during relist");
                    self.generations.remove(&key);
                    self.queue.add(key);
                }
                debug!(count, "watch.event.relist_done");
            }
        }
    }

    /// Track `resource` and queue it unless only non-spec fields changed
    fn observe(&mut self, resource: &VaultTransitUnseal) -> ObjectKey {
        let key = ObjectKey::from_resource(resource);
        self.queue.track(key.clone());

        let changed = match resource.metadata.generation {
            Some(generation) => self.generations.insert(key.clone(), generation) != Some(generation),
            None => true,
        };
        if changed {
            self.queue.add(key.clone());
        } else {
            debug!(resource = %key, "Generation unchanged, skipping");
        }
        key
    }
}

fn log_watch_error(error: &watcher::Error) {
    let rendered = format!("{error:?}");
    match classify_watch_error(&rendered) {
        WatchErrorClass::Unauthorized => error!(
            error_type = "401",
            "Watch authentication failed, RBAC may have been revoked or the token expired: {}",
            error
        ),
        WatchErrorClass::Expired => warn!(
            error_type = "410",
            "Watch resource version expired, relisting: {}",
            error
        ),
        WatchErrorClass::Throttled => warn!(
            error_type = "429",
            "API server throttling watch, backing off: {}",
            error
        ),
        WatchErrorClass::NotFound => warn!(
            error_type = "404",
            "VaultTransitUnseal not found, the CRD may be missing: {}",
            error
        ),
        WatchErrorClass::Other => error!("Watch stream error: {}", error),
    }
}

/// Run the watch until `shutdown` resolves
pub async fn run_watch_loop<F>(
    api: Api<VaultTransitUnseal>,
    queue: Arc<WorkQueue>,
    restart_delay: Duration,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut handler = EventHandler::new(queue);

    loop {
        info!("Starting VaultTransitUnseal watch");
        let stream = watcher(api.clone(), watcher::Config::default()).default_backoff();
        tokio::pin!(stream);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, exiting watch loop");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => handler.handle(event),
                    Some(Err(e)) => log_watch_error(&e),
                    None => break,
                },
            }
        }

        warn!(
            delay_secs = restart_delay.as_secs(),
            "Watch stream ended, restarting"
        );
        tokio::select! {
            () = &mut shutdown => return,
            () = tokio::time::sleep(restart_delay) => {}
        }
    }
}
