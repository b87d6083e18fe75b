//! # Vault Client
//!
//! Minimal Vault HTTP API surface used by the operator: health, seal status
//! and initialization. Every request is bounded by the client timeout.

use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum VaultClientError {
    #[error("invalid vault address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("pod {pod} has no IP address yet")]
    MissingPodIp { pod: String },
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("vault request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("vault returned HTTP {status} for {path}")]
    Status { path: String, status: u16 },
}

/// Settings for one [`VaultClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultClientConfig {
    pub address: String,
    pub tls_skip_verify: bool,
    pub timeout: Duration,
}

/// Response of `GET /v1/sys/health`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthResponse {
    pub initialized: bool,
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// Response of `GET /v1/sys/seal-status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SealStatus {
    pub initialized: bool,
    pub sealed: bool,
    #[serde(rename = "type", default)]
    pub seal_type: Option<String>,
    #[serde(default)]
    pub progress: u32,
    #[serde(rename = "t", default)]
    pub threshold: u32,
}

/// Body of `PUT /v1/sys/init` for auto-unseal (recovery key) setups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitRequest {
    pub recovery_shares: u8,
    pub recovery_threshold: u8,
}

/// Response of `PUT /v1/sys/init`; wiped from memory on drop
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct InitResponse {
    pub root_token: String,
    #[serde(default)]
    pub recovery_keys: Vec<String>,
    #[serde(default)]
    pub recovery_keys_b64: Vec<String>,
}

impl std::fmt::Debug for InitResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitResponse")
            .field("root_token", &"***")
            .field("recovery_keys", &self.recovery_keys.len())
            .finish_non_exhaustive()
    }
}

/// Client bound to one Vault address. Owned by its caller, never shared.
#[derive(Debug, Clone)]
pub struct VaultClient {
    base: Url,
    http: reqwest::Client,
}

impl VaultClient {
    /// Build a client for `config.address`
    ///
    /// # Errors
    ///
    /// Fails when the address is not an absolute http(s) URL or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &VaultClientConfig) -> Result<Self, VaultClientError> {
        let base = Url::parse(&config.address).map_err(|e| VaultClientError::InvalidAddress {
            address: config.address.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(VaultClientError::InvalidAddress {
                address: config.address.clone(),
                reason: format!("unsupported scheme '{}'", base.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.tls_skip_verify)
            .build()
            .map_err(VaultClientError::Build)?;

        Ok(Self { base, http })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// `GET /v1/sys/health`, answering 200 for every state so sealed and
    /// uninitialized nodes still report their status
    ///
    /// # Errors
    ///
    /// Fails on transport errors, timeouts and unexpected HTTP status codes.
    pub async fn health(&self) -> Result<HealthResponse, VaultClientError> {
        self.send::<(), _>(
            Method::GET,
            "v1/sys/health?standbyok=true&perfstandbyok=true&sealedcode=200&uninitcode=200",
            None,
        )
        .await
    }

    /// `GET /v1/sys/seal-status`
    ///
    /// # Errors
    ///
    /// Fails on transport errors, timeouts and unexpected HTTP status codes.
    pub async fn seal_status(&self) -> Result<SealStatus, VaultClientError> {
        self.send::<(), _>(Method::GET, "v1/sys/seal-status", None).await
    }

    /// `PUT /v1/sys/init`
    ///
    /// # Errors
    ///
    /// Fails on transport errors, timeouts and unexpected HTTP status codes
    /// (Vault answers 400 when already initialized).
    pub async fn initialize(&self, request: &InitRequest) -> Result<InitResponse, VaultClientError> {
        self.send(Method::PUT, "v1/sys/init", Some(request)).await
    }

    async fn send<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, VaultClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let path_only = path.split('?').next().unwrap_or(path).to_string();
        let url = self
            .base
            .join(path)
            .map_err(|e| VaultClientError::InvalidAddress {
                address: self.address().to_string(),
                reason: e.to_string(),
            })?;

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| VaultClientError::Request {
            path: path_only.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(VaultClientError::Status {
                path: path_only,
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|source| VaultClientError::Request {
                path: path_only,
                source,
            })
    }
}
