//! # Managed Secrets
//!
//! Idempotent create-or-update of credential secrets derived by the operator.
//!
//! Merge rules on every write:
//! - `data` is replaced wholesale with the supplied mapping; callers pass the
//!   full desired set each time
//! - `annotations` are merged: supplied keys overwrite, all others are kept
//!
//! Lost optimistic-concurrency races are retried once before failing.
//!
//! Payload buffers handed to the manager are zeroized once the write ends.

#[cfg(any(test, feature = "test-util"))]
mod memory;
mod store;

#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemorySecretStore;
pub use store::{KubeSecretStore, SecretStore, StoreError};

use crate::errors::OperatorError;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroize;

/// Number of times a conflicting write is retried before surfacing the error
const CONFLICT_RETRIES: u32 = 1;

/// Result of a successful [`SecretManager::create_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOperation {
    Created,
    Updated,
    Unchanged,
}

impl SecretOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Clone)]
pub struct SecretManager {
    store: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for SecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManager").finish_non_exhaustive()
    }
}

impl SecretManager {
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Create or update a secret without touching its annotations
    ///
    /// # Errors
    ///
    /// See [`Self::create_or_update_with_annotations`].
    pub async fn create_or_update(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<SecretOperation, OperatorError> {
        self.create_or_update_with_annotations(namespace, name, data, &BTreeMap::new())
            .await
    }

    /// Create or update a secret, replacing its data and merging `annotations`
    ///
    /// # Errors
    ///
    /// - Config error when namespace, name or a data key is empty
    /// - Transient error, with `namespace` and `name` context, when the store
    ///   fails or the write still conflicts after one retry
    pub async fn create_or_update_with_annotations(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<SecretOperation, OperatorError> {
        let mut data: BTreeMap<String, ByteString> = data
            .into_iter()
            .map(|(k, v)| (k, ByteString(v)))
            .collect();

        let result = match validate_target(namespace, name, &data) {
            Ok(()) => self.write_with_retry(namespace, name, &data, annotations).await,
            Err(e) => Err(e),
        };
        wipe(&mut data);
        result
    }

    async fn write_with_retry(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, ByteString>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<SecretOperation, OperatorError> {
        let mut attempt = 0;
        loop {
            match self.try_write(namespace, name, data, annotations).await {
                Ok(operation) => {
                    if operation != SecretOperation::Unchanged {
                        metrics::increment_secret_operations(operation.as_str());
                    }
                    debug!(
                        operation = operation.as_str(),
                        namespace,
                        name,
                        annotation_count = annotations.len(),
                        "Secret operation completed"
                    );
                    return Ok(operation);
                }
                Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    metrics::increment_secret_conflicts();
                    debug!(namespace, name, attempt, "Secret write conflicted, retrying");
                }
                Err(e) => {
                    if e.is_conflict() {
                        metrics::increment_secret_conflicts();
                    }
                    return Err(OperatorError::transient("failed to create/update secret")
                        .with_source(e)
                        .with_context("namespace", namespace)
                        .with_context("name", name));
                }
            }
        }
    }

    async fn try_write(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, ByteString>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<SecretOperation, StoreError> {
        let Some(mut existing) = self.store.get(namespace, name).await? else {
            let mut secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    annotations: non_empty(annotations.clone()),
                    ..ObjectMeta::default()
                },
                data: non_empty(data.clone()),
                ..Secret::default()
            };
            let created = self.store.create(namespace, &secret).await;
            wipe_secret(&mut secret);
            created?;
            return Ok(SecretOperation::Created);
        };

        let mut desired = existing.clone();
        if !annotations.is_empty() {
            desired
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        desired.data = non_empty(data.clone());
        // string_data is merged into data server-side
        desired.string_data = None;

        let result = if desired == existing {
            Ok(SecretOperation::Unchanged)
        } else {
            self.store
                .replace(namespace, &desired)
                .await
                .map(|_| SecretOperation::Updated)
        };
        wipe_secret(&mut existing);
        wipe_secret(&mut desired);
        result
    }

    /// Read one key of a secret
    ///
    /// # Errors
    ///
    /// - Config "secret not found" with `namespace`/`name` context when the secret is absent
    /// - Config "key not found in secret" with `namespace`/`name`/`key` context when the key is missing
    /// - Transient error when the store read fails
    pub async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>, OperatorError> {
        let secret = match self.store.get(namespace, name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                return Err(OperatorError::config("secret not found")
                    .with_context("namespace", namespace)
                    .with_context("name", name));
            }
            Err(e) => {
                return Err(OperatorError::transient("failed to get secret")
                    .with_source(e)
                    .with_context("namespace", namespace)
                    .with_context("name", name));
            }
        };

        secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|value| value.0)
            .ok_or_else(|| {
                OperatorError::config("key not found in secret")
                    .with_context("namespace", namespace)
                    .with_context("name", name)
                    .with_context("key", key)
            })
    }
}

/// The API server drops empty maps, store them as absent
fn non_empty<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (!map.is_empty()).then_some(map)
}

fn wipe(data: &mut BTreeMap<String, ByteString>) {
    for value in data.values_mut() {
        value.0.zeroize();
    }
}

fn wipe_secret(secret: &mut Secret) {
    if let Some(data) = secret.data.as_mut() {
        wipe(data);
    }
}

fn validate_target<V>(
    namespace: &str,
    name: &str,
    data: &BTreeMap<String, V>,
) -> Result<(), OperatorError> {
    if namespace.is_empty() || name.is_empty() {
        return Err(OperatorError::config("secret namespace and name are required")
            .with_context("namespace", namespace)
            .with_context("name", name));
    }
    if data.keys().any(String::is_empty) {
        return Err(OperatorError::config("secret data keys must not be empty")
            .with_context("namespace", namespace)
            .with_context("name", name));
    }
    Ok(())
}
