//! Common test utilities shared by the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use axum::{
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use tokio::net::TcpListener;
use vault_transit_unseal_operator::crd::{VaultTransitUnseal, VaultTransitUnsealSpec};

static RUSTLS_INIT: Once = Once::new();

/// Install the rustls crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        vault_transit_unseal_operator::runtime::initialization::install_crypto_provider();
    });
}

/// Minimal valid resource in namespace `vault`
pub fn sample_resource(name: &str) -> VaultTransitUnseal {
    let spec: VaultTransitUnsealSpec = serde_json::from_value(serde_json::json!({
        "vaultPod": { "selector": { "app.kubernetes.io/name": "vault" } },
        "transitVault": {
            "address": "https://transit-vault.example.com:8200",
            "secretRef": { "name": "vault-transit-token", "key": "token" }
        }
    }))
    .expect("sample spec is valid");
    let mut resource = VaultTransitUnseal::new(name, spec);
    resource.metadata.namespace = Some("vault".to_string());
    resource
}

/// Behavior of a fake Vault node
#[derive(Debug, Clone, Copy)]
pub struct FakeVault {
    pub initialized: bool,
    pub sealed: bool,
    /// Delay before every response
    pub delay: Duration,
}

/// Serve a fake Vault API on an ephemeral local port
pub async fn spawn_fake_vault(vault: FakeVault) -> SocketAddr {
    let status = move || async move {
        tokio::time::sleep(vault.delay).await;
        Json(serde_json::json!({
            "type": "transit",
            "initialized": vault.initialized,
            "sealed": vault.sealed,
            "standby": false,
            "t": 1,
            "n": 1,
            "progress": 0,
            "version": "1.17.2"
        }))
    };
    let init = move || async move {
        tokio::time::sleep(vault.delay).await;
        if vault.initialized {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "errors": ["Vault is already initialized"] })),
            ));
        }
        Ok(Json(serde_json::json!({
            "keys": [],
            "keys_base64": [],
            "recovery_keys": ["6b6579"],
            "recovery_keys_b64": ["a2V5"],
            "root_token": "hvs.fake-root"
        })))
    };

    let app = Router::new()
        .route("/v1/sys/health", get(status))
        .route("/v1/sys/seal-status", get(status))
        .route("/v1/sys/init", put(init));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake vault server");
    });
    addr
}
