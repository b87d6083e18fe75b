//! # Vault Client Tests
//!
//! Exercises the Vault client and readiness probing against a local fake
//! Vault API.

mod common;

use async_trait::async_trait;
use common::{init_rustls, spawn_fake_vault, FakeVault};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use vault_transit_unseal_operator::health::{HealthChecker, HealthError, StatusProbe};
use vault_transit_unseal_operator::vault::{
    InitRequest, PodClientFactory, VaultClient, VaultClientError,
};

const HEALTHY: FakeVault = FakeVault {
    initialized: true,
    sealed: false,
    delay: Duration::ZERO,
};

fn client_for(addr: std::net::SocketAddr, timeout: Duration) -> VaultClient {
    init_rustls();
    PodClientFactory::new(false, timeout)
        .new_client(format!("http://{addr}"))
        .expect("valid address")
}

/// Readiness probe calling one fixed Vault client
struct ClientProbe(VaultClient);

#[async_trait]
impl StatusProbe for ClientProbe {
    async fn check(&self) -> Result<(), HealthError> {
        self.0.health().await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_health_reports_sealed_node() {
    let addr = spawn_fake_vault(FakeVault {
        sealed: true,
        ..HEALTHY
    })
    .await;
    let health = client_for(addr, Duration::from_secs(2)).health().await.unwrap();

    assert!(health.initialized);
    assert!(health.sealed);
    assert_eq!(health.version.as_deref(), Some("1.17.2"));
}

#[tokio::test]
async fn test_seal_status_reads_transit_seal() {
    let addr = spawn_fake_vault(HEALTHY).await;
    let status = client_for(addr, Duration::from_secs(2))
        .seal_status()
        .await
        .unwrap();

    assert!(!status.sealed);
    assert_eq!(status.seal_type.as_deref(), Some("transit"));
}

#[tokio::test]
async fn test_initialize_returns_recovery_material() {
    let addr = spawn_fake_vault(FakeVault {
        initialized: false,
        ..HEALTHY
    })
    .await;
    let response = client_for(addr, Duration::from_secs(2))
        .initialize(&InitRequest {
            recovery_shares: 1,
            recovery_threshold: 1,
        })
        .await
        .unwrap();

    assert_eq!(response.root_token, "hvs.fake-root");
    assert_eq!(response.recovery_keys_b64, vec!["a2V5".to_string()]);
}

#[tokio::test]
async fn test_initialize_on_initialized_vault_is_status_error() {
    let addr = spawn_fake_vault(HEALTHY).await;
    let err = client_for(addr, Duration::from_secs(2))
        .initialize(&InitRequest {
            recovery_shares: 1,
            recovery_threshold: 1,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, VaultClientError::Status { status: 400, .. }));
}

#[tokio::test]
async fn test_requests_are_bounded_by_client_timeout() {
    let addr = spawn_fake_vault(FakeVault {
        delay: Duration::from_secs(5),
        ..HEALTHY
    })
    .await;
    let err = client_for(addr, Duration::from_millis(100))
        .health()
        .await
        .unwrap_err();

    assert!(matches!(err, VaultClientError::Request { .. }));
}

#[tokio::test]
async fn test_readiness_against_reachable_vault() {
    let addr = spawn_fake_vault(HEALTHY).await;
    let checker = HealthChecker::new(
        Arc::new(AtomicBool::new(true)),
        Arc::new(ClientProbe(client_for(addr, Duration::from_secs(2)))),
    );

    assert!(checker.readiness(Duration::from_secs(2)).await.is_ok());
}

#[tokio::test]
async fn test_readiness_fails_closed_on_slow_vault() {
    let addr = spawn_fake_vault(FakeVault {
        delay: Duration::from_secs(5),
        ..HEALTHY
    })
    .await;
    let checker = HealthChecker::new(
        Arc::new(AtomicBool::new(true)),
        Arc::new(ClientProbe(client_for(addr, Duration::from_secs(30)))),
    );

    let err = checker
        .readiness(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, HealthError::DeadlineExceeded(_)));
    assert!(checker.liveness().is_ok());
}

#[tokio::test]
async fn test_readiness_fails_when_vault_unreachable() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let checker = HealthChecker::new(
        Arc::new(AtomicBool::new(true)),
        Arc::new(ClientProbe(client_for(addr, Duration::from_secs(2)))),
    );
    let err = checker.readiness(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, HealthError::Unreachable(_)));
}
