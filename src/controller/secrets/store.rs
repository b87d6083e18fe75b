//! # Secret Store
//!
//! Namespaced key-value object store holding managed secrets.
//!
//! Writes are guarded by the object's `resourceVersion`: replacing an object
//! whose version moved on since it was read fails with [`StoreError::Conflict`].

use crate::errors::BoxError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::{Api, Client};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object already exists")]
    AlreadyExists,
    #[error("the object has been modified; please apply your changes to the latest version")]
    Conflict,
    #[error(transparent)]
    Backend(BoxError),
}

impl StoreError {
    /// Whether the write lost an optimistic-concurrency race
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists | Self::Conflict)
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Create a new object; fails with [`StoreError::AlreadyExists`] if present
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace an existing object, honoring `metadata.resourceVersion`
    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError>;
}

/// Secrets stored in the Kubernetes API server
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(err: kube::Error) -> StoreError {
    match &err {
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict,
        _ => StoreError::Backend(Box::new(err)),
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.api(namespace).get_opt(name).await.map_err(map_kube_error)
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(map_kube_error)
    }

    async fn replace(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        self.api(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map_err(map_kube_error)
    }
}
