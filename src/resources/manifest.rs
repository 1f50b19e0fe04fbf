//! Typed manifests loaded from the rendered upgrade template.
//!
//! Every rendered document is parsed into a [`Manifest`], tagged by the role
//! it plays in the upgrade: configuration, service exposure, the upgrade task
//! itself, or anything else. The task locator is a filter over that tag.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::controller::error::Error;
use crate::resources::template::RawManifest;

/// Kinds treated as configuration for the upgrade task.
const CONFIG_KINDS: &[&str] = &[
    "ConfigMap",
    "Secret",
    "ServiceAccount",
    "Role",
    "RoleBinding",
    "PersistentVolumeClaim",
];

/// Kinds that expose the application over the network.
const SERVICE_KINDS: &[&str] = &["Service", "Route", "Ingress"];

/// A rendered resource, tagged by its role in the upgrade.
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    /// Configuration consumed by the task (ConfigMap, Secret, RBAC, ...).
    Config(DynamicObject),
    /// Network exposure (Service, Route, Ingress).
    Service(DynamicObject),
    /// The executable upgrade task.
    Task(Pod),
    /// Any other resource kind.
    Other(DynamicObject),
}

impl Manifest {
    /// Resource kind (e.g. "ConfigMap").
    pub fn kind(&self) -> &str {
        match self {
            Manifest::Task(_) => "Pod",
            Manifest::Config(obj) | Manifest::Service(obj) | Manifest::Other(obj) => obj
                .types
                .as_ref()
                .map(|t| t.kind.as_str())
                .unwrap_or_default(),
        }
    }

    /// API version (e.g. "v1", "apps/v1").
    pub fn api_version(&self) -> &str {
        match self {
            Manifest::Task(_) => "v1",
            Manifest::Config(obj) | Manifest::Service(obj) | Manifest::Other(obj) => obj
                .types
                .as_ref()
                .map(|t| t.api_version.as_str())
                .unwrap_or_default(),
        }
    }

    /// Resource name, empty if the template left it unset.
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object metadata.
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Manifest::Task(pod) => &pod.metadata,
            Manifest::Config(obj) | Manifest::Service(obj) | Manifest::Other(obj) => &obj.metadata,
        }
    }

    /// Mutable object metadata.
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Manifest::Task(pod) => &mut pod.metadata,
            Manifest::Config(obj) | Manifest::Service(obj) | Manifest::Other(obj) => {
                &mut obj.metadata
            }
        }
    }

    /// Whether this manifest is the upgrade task.
    pub fn is_task(&self) -> bool {
        matches!(self, Manifest::Task(_))
    }

    /// API resource used to address dynamically typed manifests.
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(self.api_version(), self.kind())
    }
}

/// Parse a rendered document into a typed manifest.
pub fn parse(raw: &RawManifest) -> Result<Manifest, Error> {
    let value: Value = serde_yaml::from_str(raw.as_str())?;

    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Manifest("document has no kind".to_string()))?
        .to_string();
    let api_version = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Manifest(format!("{kind} has no apiVersion")))?
        .to_string();

    let has_name = value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .is_some_and(|n| !n.is_empty());
    if !has_name {
        return Err(Error::Manifest(format!("{kind} has no metadata.name")));
    }

    if kind == "Pod" && api_version == "v1" {
        let pod: Pod = serde_json::from_value(value)?;
        return Ok(Manifest::Task(pod));
    }

    let obj: DynamicObject = serde_json::from_value(value)?;
    if CONFIG_KINDS.contains(&kind.as_str()) {
        Ok(Manifest::Config(obj))
    } else if SERVICE_KINDS.contains(&kind.as_str()) {
        Ok(Manifest::Service(obj))
    } else {
        Ok(Manifest::Other(obj))
    }
}

/// Parse every rendered document, failing on the first malformed one.
pub fn parse_all(raw: &[RawManifest]) -> Result<Vec<Manifest>, Error> {
    raw.iter().map(parse).collect()
}

/// Find the upgrade task among the rendered manifests.
///
/// Returns the first task-shaped manifest. A set without one cannot be used
/// to upgrade and is reported as [`Error::TaskNotFound`].
pub fn locate_task(manifests: &[Manifest]) -> Result<&Pod, Error> {
    manifests
        .iter()
        .find_map(|m| match m {
            Manifest::Task(pod) => Some(pod),
            _ => None,
        })
        .ok_or(Error::TaskNotFound)
}

/// Mutable variant of [`locate_task`].
pub fn locate_task_mut(manifests: &mut [Manifest]) -> Result<&mut Pod, Error> {
    manifests
        .iter_mut()
        .find_map(|m| match m {
            Manifest::Task(pod) => Some(pod),
            _ => None,
        })
        .ok_or(Error::TaskNotFound)
}

/// Split an apiVersion into group and version ("apps/v1" -> ("apps", "v1")).
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from an apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Lowercase plural resource name for a kind.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y').filter(|s| {
        !s.ends_with('a') && !s.ends_with('e') && !s.ends_with('o')
    }) {
        format!("{stem}ies")
    } else {
        format!("{lower}s")
    }
}
