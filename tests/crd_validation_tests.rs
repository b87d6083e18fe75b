//! # CRD Validation Tests
//!
//! Tests for the `VaultTransitUnseal` CRD to catch schema drift early.

use kube::core::CustomResourceExt;
use vault_transit_unseal_operator::crd::VaultTransitUnseal;

#[test]
fn test_full_resource_deserializes() {
    let yaml = r#"
apiVersion: vault.homelab.io/v1alpha1
kind: VaultTransitUnseal
metadata:
  name: vault
  namespace: vault
spec:
  vaultPod:
    namespace: vault
    selector:
      app.kubernetes.io/name: vault
      component: server
  transitVault:
    address: https://transit-vault.example.com:8200
    secretRef:
      name: vault-transit-token
      key: token
    keyName: autounseal
    mountPath: transit
    tlsSkipVerify: true
  initialization:
    recoveryShares: 5
    recoveryThreshold: 3
    secretNames:
      adminToken: admin-token
      recoveryKeys: recovery-keys
      adminTokenAnnotations:
        reflector.v1.k8s.emberstack.com/reflection-allowed: "true"
  monitoring:
    checkInterval: 1m
"#;
    let resource: VaultTransitUnseal = serde_yaml::from_str(yaml).unwrap();
    let spec = &resource.spec;

    assert_eq!(spec.vault_pod.namespace.as_deref(), Some("vault"));
    assert_eq!(
        spec.vault_pod.label_selector(),
        "app.kubernetes.io/name=vault,component=server"
    );
    assert_eq!(spec.transit_vault.key_name.as_deref(), Some("autounseal"));
    assert!(spec.transit_vault.tls_skip_verify);
    assert_eq!(spec.initialization.recovery_shares, 5);
    assert_eq!(spec.initialization.recovery_threshold, 3);
    assert_eq!(spec.initialization.secret_names.admin_token, "admin-token");
    assert_eq!(
        spec.initialization
            .secret_names
            .admin_token_annotations
            .get("reflector.v1.k8s.emberstack.com/reflection-allowed")
            .map(String::as_str),
        Some("true")
    );
    assert_eq!(spec.monitoring.check_interval, "1m");
}

#[test]
fn test_minimal_resource_gets_defaults() {
    let yaml = r#"
apiVersion: vault.homelab.io/v1alpha1
kind: VaultTransitUnseal
metadata:
  name: vault
  namespace: vault
spec:
  vaultPod:
    selector:
      app: vault
  transitVault:
    address: https://transit-vault.example.com:8200
    secretRef:
      name: vault-transit-token
      key: token
"#;
    let resource: VaultTransitUnseal = serde_yaml::from_str(yaml).unwrap();
    let spec = &resource.spec;

    assert_eq!(spec.vault_pod.namespace, None);
    assert_eq!(spec.initialization.recovery_shares, 1);
    assert_eq!(spec.initialization.recovery_threshold, 1);
    assert_eq!(spec.initialization.secret_names.admin_token, "vault-admin-token");
    assert_eq!(spec.initialization.secret_names.recovery_keys, "vault-keys");
    assert_eq!(spec.monitoring.check_interval, "30s");
    assert!(resource.status.is_none());
}

#[test]
fn test_missing_transit_vault_is_rejected() {
    let yaml = r#"
apiVersion: vault.homelab.io/v1alpha1
kind: VaultTransitUnseal
metadata:
  name: vault
spec:
  vaultPod:
    selector:
      app: vault
"#;
    assert!(serde_yaml::from_str::<VaultTransitUnseal>(yaml).is_err());
}

#[test]
fn test_generated_crd_shape() {
    let crd = VaultTransitUnseal::crd();
    assert_eq!(
        crd.metadata.name.as_deref(),
        Some("vaulttransitunseals.vault.homelab.io")
    );
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.short_names, Some(vec!["vtu".to_string()]));

    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());

    let yaml = serde_yaml::to_string(&crd).unwrap();
    assert!(yaml.contains("transitVault"));
    assert!(yaml.contains("checkInterval"));
}
