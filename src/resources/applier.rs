//! Applying rendered manifests on behalf of an Installation.

use kube::ResourceExt;
use tracing::debug;

use crate::client::{ClusterApi, CreateOutcome};
use crate::controller::error::Error;
use crate::crd::Installation;
use crate::resources::common::owner_reference;
use crate::resources::manifest::Manifest;

/// What an apply did to the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object was created.
    Created,
    /// An existing object was replaced.
    Replaced,
    /// The object already existed and was left as is.
    Unchanged,
}

/// Copy of `manifest` placed in the owner's namespace and owned by it.
///
/// The owner's `spec.annotations` are added to the manifest's own, winning
/// on conflicting keys.
pub fn stamp(manifest: &Manifest, owner: &Installation) -> Manifest {
    let mut stamped = manifest.clone();
    let owner_ref = owner_reference(owner);
    let metadata = stamped.metadata_mut();
    metadata.namespace = owner.namespace();

    if !owner.spec.annotations.is_empty() {
        let annotations = metadata.annotations.get_or_insert_with(Default::default);
        for (key, value) in &owner.spec.annotations {
            annotations.insert(key.clone(), value.clone());
        }
    }

    let refs = metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner_ref.uid);
    refs.push(owner_ref);

    stamped
}

/// Apply a single manifest.
///
/// With `force_replace` an existing object is replaced by the rendered one.
/// Without it the apply is create-only and an existing object counts as
/// success.
pub async fn apply(
    cluster: &dyn ClusterApi,
    manifest: &Manifest,
    owner: &Installation,
    force_replace: bool,
) -> Result<ApplyOutcome, Error> {
    let stamped = stamp(manifest, owner);
    let wrap = |e: Error| match e {
        Error::Transient(_) | Error::Conflict(_) => e,
        other => Error::Apply {
            kind: stamped.kind().to_string(),
            name: stamped.name().to_string(),
            message: other.to_string(),
        },
    };

    match cluster.create(&stamped).await.map_err(wrap)? {
        CreateOutcome::Created => Ok(ApplyOutcome::Created),
        CreateOutcome::AlreadyExists if force_replace => {
            cluster.replace(&stamped).await.map_err(wrap)?;
            Ok(ApplyOutcome::Replaced)
        }
        CreateOutcome::AlreadyExists => Ok(ApplyOutcome::Unchanged),
    }
}

/// Apply every manifest in order, stopping at the first failure.
pub async fn apply_all(
    cluster: &dyn ClusterApi,
    manifests: &[Manifest],
    owner: &Installation,
    force_replace: bool,
) -> Result<Vec<ApplyOutcome>, Error> {
    let mut outcomes = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let outcome = apply(cluster, manifest, owner, force_replace).await?;
        debug!(
            kind = %manifest.kind(),
            name = %manifest.name(),
            outcome = ?outcome,
            "Applied manifest"
        );
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
