//! Vault Transit Unseal Operator Library
//!
//! Reconciles `VaultTransitUnseal` resources: keeps a transit-sealed Vault
//! initialized and watches it unseal itself, publishing the credentials
//! produced at initialization as Kubernetes secrets.
//!
//! ## Quick Start
//!
//! ```rust
//! use vault_transit_unseal_operator::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod errors;
pub mod health;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod vault;
