//! # CRD Generator
//!
//! Generates the `VaultTransitUnseal` CustomResourceDefinition YAML.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/vaulttransitunseal.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use vault_transit_unseal_operator::crd::VaultTransitUnseal;

fn main() -> anyhow::Result<()> {
    let crd = VaultTransitUnseal::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
