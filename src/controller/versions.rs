//! Target and live version resolution.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::client::VersionSource;
use crate::controller::error::{Error, Result};

/// Resolves the version the controller upgrades to and the version live in
/// a namespace.
///
/// The target version is read once, on first use, and is authoritative for
/// the life of the process. A failed read leaves the cache empty so a later
/// call retries. The live version is read fresh on every call.
pub struct VersionResolver {
    source: Arc<dyn VersionSource>,
    target: OnceCell<String>,
}

impl VersionResolver {
    /// Create a resolver over a version source.
    pub fn new(source: Arc<dyn VersionSource>) -> Self {
        Self {
            source,
            target: OnceCell::new(),
        }
    }

    /// Version of the bundled upgrade template.
    pub async fn target_version(&self) -> Result<String> {
        let version = self
            .target
            .get_or_try_init(|| async {
                let version = self.source.bundled_template_version().await?;
                let version = version.trim().to_string();
                if version.is_empty() {
                    return Err(Error::VersionUnresolved(
                        "bundled template version is empty".to_string(),
                    ));
                }
                info!(version = %version, "Resolved target version");
                Ok(version)
            })
            .await?;
        Ok(version.clone())
    }

    /// Version currently live in `namespace`.
    pub async fn live_version(&self, namespace: &str) -> Result<String> {
        let version = self.source.namespace_version(namespace).await?;
        let version = version.trim().to_string();
        if version.is_empty() {
            return Err(Error::VersionUnresolved(format!(
                "namespace {namespace} reports an empty version"
            )));
        }
        Ok(version)
    }
}
