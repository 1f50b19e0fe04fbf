//! Common resource utilities.
//!
//! Labels and owner references stamped onto every resource the operator
//! applies on behalf of an Installation.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Installation;

/// Value of the `app.kubernetes.io/managed-by` label.
pub const MANAGED_BY: &str = "installation-operator";

/// Standard labels applied to all managed resources
pub fn standard_labels(installation: &Installation) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        installation.name_any(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );

    // Merge user-defined labels
    for (key, value) in &installation.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Create a controller owner reference pointing at an Installation
pub fn owner_reference(installation: &Installation) -> OwnerReference {
    OwnerReference {
        api_version: Installation::api_version(&()).to_string(),
        kind: Installation::kind(&()).to_string(),
        name: installation.name_any(),
        uid: installation.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
