//! # Work Queue
//!
//! Per-identity single-flight queue with monotonic not-before timestamps.
//!
//! - An identity is pending at most once; re-adding keeps the earliest not-before
//! - An identity handed out by [`WorkQueue::next`] is in flight until
//!   [`WorkQueue::done`]; adds arriving meanwhile stay pending and are only
//!   dispatched after completion
//! - Known identities are remembered so [`WorkQueue::resync`] can re-queue them

use crate::crd::ObjectKey;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<ObjectKey, Instant>,
    in_flight: HashSet<ObjectKey>,
    known: BTreeSet<ObjectKey>,
}

/// Result of a non-blocking pop
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Ready(ObjectKey),
    /// Nothing ready before this instant
    Wait(Instant),
    Empty,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` for immediate processing
    pub fn add(&self, key: ObjectKey) {
        self.add_at(key, Instant::now());
    }

    /// Queue `key` to run no earlier than `delay` from now
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        self.add_at(key, Instant::now() + delay);
    }

    /// Queue `key` to run no earlier than `not_before`
    pub fn add_at(&self, key: ObjectKey, not_before: Instant) {
        let mut state = self.lock();
        state
            .pending
            .entry(key)
            .and_modify(|existing| *existing = (*existing).min(not_before))
            .or_insert(not_before);
        drop(state);
        self.notify.notify_one();
    }

    /// Remember `key` for resync
    pub fn track(&self, key: ObjectKey) {
        self.lock().known.insert(key);
    }

    /// Stop remembering `key` and drop any timed retry for it
    pub fn untrack(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.known.remove(key);
        state.pending.remove(key);
    }

    /// Replace the known set after a full relist, returning the identities
    /// that vanished while the watch was not looking
    pub fn replace_known(&self, keys: BTreeSet<ObjectKey>) -> Vec<ObjectKey> {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut state.known, keys);
        previous
            .into_iter()
            .filter(|key| !state.known.contains(key))
            .collect()
    }

    /// Queue every known identity for immediate processing
    pub fn resync(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let keys: Vec<ObjectKey> = state.known.iter().cloned().collect();
        for key in &keys {
            state
                .pending
                .entry(key.clone())
                .and_modify(|existing| *existing = (*existing).min(now))
                .or_insert(now);
        }
        drop(state);
        self.notify.notify_one();
        keys.len()
    }

    /// Pop the earliest ready identity that is not in flight
    pub fn try_pop(&self, now: Instant) -> Pop {
        let mut state = self.lock();
        let earliest = state
            .pending
            .iter()
            .filter(|(key, _)| !state.in_flight.contains(*key))
            .min_by(|(ka, ta), (kb, tb)| ta.cmp(tb).then_with(|| ka.cmp(kb)))
            .map(|(key, at)| (key.clone(), *at));

        match earliest {
            Some((key, at)) if at <= now => {
                state.pending.remove(&key);
                state.in_flight.insert(key.clone());
                Pop::Ready(key)
            }
            Some((_, at)) => Pop::Wait(at),
            None => Pop::Empty,
        }
    }

    /// Wait for the next ready identity and mark it in flight
    ///
    /// Cancel-safe: an identity is only removed from the queue when this
    /// future completes.
    pub async fn next(&self) -> ObjectKey {
        loop {
            let notified = self.notify.notified();
            match self.try_pop(Instant::now()) {
                Pop::Ready(key) => return key,
                Pop::Wait(at) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(at) => {}
                        () = notified => {}
                    }
                }
                Pop::Empty => notified.await,
            }
        }
    }

    /// Mark `key` as no longer in flight
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.in_flight.remove(key);
        let has_pending = state.pending.contains_key(key);
        drop(state);
        if has_pending {
            self.notify.notify_one();
        }
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &ObjectKey) -> bool {
        self.lock().in_flight.contains(key)
    }

    #[must_use]
    pub fn pending_at(&self, key: &ObjectKey) -> Option<Instant> {
        self.lock().pending.get(key).copied()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
