//! # Vault
//!
//! - `client`: HTTP client for one Vault address
//! - `factory`: per-pod client construction

mod client;
mod factory;

pub use client::{
    HealthResponse, InitRequest, InitResponse, SealStatus, VaultClient, VaultClientConfig,
    VaultClientError,
};
pub use factory::{PodClientFactory, VaultClientFactory};
