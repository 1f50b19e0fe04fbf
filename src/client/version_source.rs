//! Sources for the target and live application versions.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::controller::error::Error;
use crate::resources::template::Templates;

/// Key holding the version in the version ConfigMap.
pub const VERSION_KEY: &str = "version";

/// Where version strings come from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Version the bundled upgrade template installs.
    async fn bundled_template_version(&self) -> Result<String, Error>;

    /// Version currently live in a namespace.
    async fn namespace_version(&self, namespace: &str) -> Result<String, Error>;
}

/// Reads the target version from the template descriptor and the live
/// version from the `<app>-version` ConfigMap the upgrade task maintains.
#[derive(Clone)]
pub struct KubeVersionSource {
    client: Client,
    templates: Arc<Templates>,
}

impl KubeVersionSource {
    /// Create a version source.
    pub fn new(client: Client, templates: Arc<Templates>) -> Self {
        Self { client, templates }
    }
}

#[async_trait]
impl VersionSource for KubeVersionSource {
    async fn bundled_template_version(&self) -> Result<String, Error> {
        Ok(self.templates.descriptor().version.clone())
    }

    async fn namespace_version(&self, namespace: &str) -> Result<String, Error> {
        let name = self.templates.descriptor().version_config_map();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(&name).await?.ok_or_else(|| {
            Error::VersionUnresolved(format!("ConfigMap {namespace}/{name} not found"))
        })?;
        version_from_config_map(&config_map).ok_or_else(|| {
            Error::VersionUnresolved(format!(
                "ConfigMap {namespace}/{name} has no '{VERSION_KEY}' entry"
            ))
        })
    }
}

/// Extract the trimmed, non-empty version entry of a ConfigMap.
pub fn version_from_config_map(config_map: &ConfigMap) -> Option<String> {
    config_map
        .data
        .as_ref()?
        .get(VERSION_KEY)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
