//! Cluster access used by the upgrade reconciler.
//!
//! [`ClusterApi`] is the narrow seam between the upgrade logic and the
//! Kubernetes API server: fetch the task, create or replace rendered
//! manifests, and read or commit Installation status. [`KubeClusterApi`] is
//! the production implementation; tests substitute a mock or an in-memory
//! fake.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Error;
use crate::crd::Installation;
use crate::resources::manifest::Manifest;

/// Result of a create-only apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object did not exist and was created.
    Created,
    /// An object with the same name already exists.
    AlreadyExists,
}

/// Kubernetes operations needed to drive an upgrade.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a pod by name; `None` when it does not exist.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// Create a manifest in its (already stamped) namespace.
    ///
    /// A name collision is reported as [`CreateOutcome::AlreadyExists`], not
    /// as an error.
    async fn create(&self, manifest: &Manifest) -> Result<CreateOutcome, Error>;

    /// Replace an existing object with the manifest's content.
    async fn replace(&self, manifest: &Manifest) -> Result<(), Error>;

    /// Read the current copy of an Installation.
    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Installation, Error>;

    /// Submit the Installation's status, guarded by its resourceVersion.
    ///
    /// Returns [`Error::Conflict`] when the stored object changed since it
    /// was read.
    async fn update_status(&self, installation: &Installation) -> Result<Installation, Error>;
}

/// [`ClusterApi`] backed by a kube [`Client`].
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new cluster API wrapper.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, manifest: &Manifest) -> Result<Api<DynamicObject>, Error> {
        let namespace = manifest
            .metadata()
            .namespace
            .as_deref()
            .ok_or_else(|| {
                Error::MissingField(format!(
                    "{}/{}.metadata.namespace",
                    manifest.kind(),
                    manifest.name()
                ))
            })?;
        Ok(Api::namespaced_with(
            self.client.clone(),
            namespace,
            &manifest.api_resource(),
        ))
    }

    fn pod_api(&self, pod: &Pod) -> Result<Api<Pod>, Error> {
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingField("Pod.metadata.namespace".to_string()))?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == code)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, manifest: &Manifest) -> Result<CreateOutcome, Error> {
        let result = match manifest {
            Manifest::Task(pod) => self
                .pod_api(pod)?
                .create(&PostParams::default(), pod)
                .await
                .map(|_| ()),
            Manifest::Config(obj) | Manifest::Service(obj) | Manifest::Other(obj) => self
                .dynamic_api(manifest)?
                .create(&PostParams::default(), obj)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(e) if is_status(&e, 409) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, manifest: &Manifest) -> Result<(), Error> {
        match manifest {
            Manifest::Task(pod) => {
                // Pod specs are immutable; replacing means delete and recreate.
                let api = self.pod_api(pod)?;
                let name = pod.name_any();
                match api.delete(&name, &DeleteParams::background()).await {
                    Ok(_) => debug!(name = %name, "Deleted previous upgrade task"),
                    Err(e) if is_status(&e, 404) => {}
                    Err(e) => return Err(e.into()),
                }
                match api.create(&PostParams::default(), pod).await {
                    Ok(_) => Ok(()),
                    Err(e) if is_status(&e, 409) => Err(Error::Transient(format!(
                        "previous upgrade task {name} is still terminating"
                    ))),
                    Err(e) => Err(e.into()),
                }
            }
            Manifest::Config(obj) | Manifest::Service(obj) | Manifest::Other(obj) => {
                let api = self.dynamic_api(manifest)?;
                let name = manifest.name();
                let Some(existing) = api.get_opt(name).await? else {
                    api.create(&PostParams::default(), obj).await?;
                    return Ok(());
                };
                let mut desired = obj.clone();
                desired.metadata.resource_version = existing.metadata.resource_version;
                api.replace(name, &PostParams::default(), &desired).await?;
                Ok(())
            }
        }
    }

    async fn get_installation(&self, namespace: &str, name: &str) -> Result<Installation, Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn update_status(&self, installation: &Installation) -> Result<Installation, Error> {
        let name = installation.name_any();
        let namespace = installation
            .namespace()
            .ok_or_else(|| Error::MissingField("Installation.metadata.namespace".to_string()))?;
        let api: Api<Installation> = Api::namespaced(self.client.clone(), &namespace);

        // resourceVersion in a merge patch makes the API server reject the
        // write if the object changed since it was read.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": installation.resource_version() },
            "status": installation.status,
        });

        match api
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if is_status(&e, 409) => Err(Error::Conflict(name)),
            Err(e) => Err(e.into()),
        }
    }
}
