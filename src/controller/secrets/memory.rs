//! # In-Memory Secret Store
//!
//! [`SecretStore`] backed by a map, with resource versions and optional
//! injected conflicts or failures. Every call yields to the runtime first so
//! concurrent writers interleave the way they would against the API server.
//! Empty `data` and `annotations` maps are dropped on write, as the API server
//! does.
//!
//! Only built for tests and with the `test-util` feature.

use super::store::{SecretStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    objects: Mutex<HashMap<(String, String), Secret>>,
    next_version: AtomicUsize,
    injected_conflicts: AtomicUsize,
    injected_failures: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` replace calls fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` create or replace calls fail with a backend error
    pub fn inject_failures(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful create/replace calls
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current stored object, bypassing the async interface
    #[must_use]
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Seed an object directly, assigning it a fresh resource version
    pub fn insert(&self, namespace: &str, secret: &Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let stored = self.stored(namespace, secret);
        self.lock().insert((namespace.to_string(), name), stored);
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn take_injected_conflict(&self) -> bool {
        take_one(&self.injected_conflicts)
    }

    fn take_injected_failure(&self) -> Result<(), StoreError> {
        if take_one(&self.injected_failures) {
            return Err(StoreError::Backend("etcdserver: request timed out".into()));
        }
        Ok(())
    }

    fn stored(&self, namespace: &str, secret: &Secret) -> Secret {
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.bump_version());
        if stored.metadata.annotations.as_ref().is_some_and(BTreeMap::is_empty) {
            stored.metadata.annotations = None;
        }
        if stored.data.as_ref().is_some_and(BTreeMap::is_empty) {
            stored.data = None;
        }
        stored
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), Secret>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.snapshot(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        tokio::task::yield_now().await;
        self.take_injected_failure()?;
        let name = secret.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name);
        let mut objects = self.lock();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let stored = self.stored(namespace, secret);
        objects.insert(key, stored.clone());
        drop(objects);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        tokio::task::yield_now().await;
        self.take_injected_failure()?;
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict);
        }
        let name = secret.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        let mut objects = self.lock();
        let Some(current) = objects.get(&key) else {
            return Err(StoreError::Backend(
                format!("secrets \"{name}\" not found").into(),
            ));
        };
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict);
        }
        let stored = self.stored(namespace, secret);
        objects.insert(key, stored.clone());
        drop(objects);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
