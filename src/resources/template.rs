//! Upgrade template rendering.
//!
//! The upgrade resources ship as a minijinja template plus a small YAML
//! descriptor naming the application and the version the template installs.
//! Both are bundled into the binary; `TEMPLATE_DIR` may point at a directory
//! holding replacements with the same file names.

use std::collections::BTreeMap;
use std::path::Path;

use kube::ResourceExt;
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};

use crate::controller::error::Error;
use crate::crd::Installation;
use crate::resources::common::standard_labels;

/// Bundled upgrade template loaded at compile time
const UPGRADE_TEMPLATE: &str = include_str!("../../templates/upgrade.yaml");

/// Bundled template descriptor loaded at compile time
const DESCRIPTOR: &str = include_str!("../../templates/descriptor.yaml");

const UPGRADE_TEMPLATE_FILE: &str = "upgrade.yaml";
const DESCRIPTOR_FILE: &str = "descriptor.yaml";

/// Registry used when the Installation does not name one.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// One rendered YAML document, not yet parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawManifest(String);

impl RawManifest {
    /// Wrap a YAML document.
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    /// The YAML source.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of the bundled application.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TemplateDescriptor {
    /// Application name, used as a prefix for rendered resource names.
    pub name: String,
    /// Version the template installs.
    pub version: String,
}

impl TemplateDescriptor {
    /// Name of the ConfigMap recording the version live in a namespace.
    pub fn version_config_map(&self) -> String {
        format!("{}-version", self.name)
    }
}

#[derive(Serialize)]
struct RenderResources<'a> {
    memory: Option<&'a str>,
    cpu: Option<&'a str>,
}

#[derive(Serialize)]
struct RenderContext<'a> {
    app: &'a str,
    name: String,
    namespace: String,
    version: &'a str,
    version_config_map: String,
    registry: &'a str,
    resources: RenderResources<'a>,
    features: &'a BTreeMap<String, bool>,
    labels: BTreeMap<String, String>,
}

/// The upgrade template and its descriptor.
#[derive(Clone, Debug)]
pub struct Templates {
    upgrade: String,
    descriptor: TemplateDescriptor,
}

impl Templates {
    /// Templates compiled into the binary.
    pub fn bundled() -> Result<Self, Error> {
        Self::from_sources(UPGRADE_TEMPLATE, DESCRIPTOR)
    }

    /// Templates from `dir` when set, the bundled ones otherwise.
    pub fn load(dir: Option<&Path>) -> Result<Self, Error> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::bundled(),
        }
    }

    /// Templates read from a directory containing `upgrade.yaml` and
    /// `descriptor.yaml`.
    pub fn from_dir(dir: &Path) -> Result<Self, Error> {
        let read = |file: &str| {
            let path = dir.join(file);
            std::fs::read_to_string(&path).map_err(|e| {
                Error::Template(format!("failed to read {}: {}", path.display(), e))
            })
        };
        Self::from_sources(&read(UPGRADE_TEMPLATE_FILE)?, &read(DESCRIPTOR_FILE)?)
    }

    /// Templates from in-memory sources.
    pub fn from_sources(upgrade: &str, descriptor: &str) -> Result<Self, Error> {
        let descriptor: TemplateDescriptor = serde_yaml::from_str(descriptor)?;
        if descriptor.version.trim().is_empty() {
            return Err(Error::Template(
                "template descriptor has an empty version".to_string(),
            ));
        }
        Ok(Self {
            upgrade: upgrade.to_string(),
            descriptor,
        })
    }

    /// Descriptor of the bundled application.
    pub fn descriptor(&self) -> &TemplateDescriptor {
        &self.descriptor
    }

    /// Render the upgrade resources for an installation.
    ///
    /// The output is deterministic for a given installation and target
    /// version. Each non-empty YAML document becomes one [`RawManifest`].
    pub fn render_upgrade(
        &self,
        installation: &Installation,
        target_version: &str,
    ) -> Result<Vec<RawManifest>, Error> {
        let spec = &installation.spec;
        let context = RenderContext {
            app: &self.descriptor.name,
            name: installation.name_any(),
            namespace: installation.namespace().unwrap_or_default(),
            version: target_version,
            version_config_map: self.descriptor.version_config_map(),
            registry: spec.registry.as_deref().unwrap_or(DEFAULT_REGISTRY),
            resources: RenderResources {
                memory: spec.resources.memory.as_deref(),
                cpu: spec.resources.cpu.as_deref(),
            },
            features: &spec.features,
            labels: standard_labels(installation),
        };

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("upgrade", &self.upgrade)
            .map_err(|e| Error::Template(format!("invalid upgrade template: {e}")))?;
        let rendered = env
            .get_template("upgrade")
            .and_then(|t| t.render(&context))
            .map_err(|e| Error::Template(format!("failed to render upgrade template: {e}")))?;

        Ok(split_yaml_documents(&rendered)
            .into_iter()
            .map(RawManifest::new)
            .collect())
    }
}

/// Split multi-document YAML, dropping documents with no content.
fn split_yaml_documents(yaml: &str) -> Vec<String> {
    yaml.split("\n---")
        .map(|doc| doc.trim().to_string())
        .filter(|doc| {
            doc.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
        })
        .collect()
}
