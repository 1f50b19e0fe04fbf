//! Kubernetes access for the upgrade controller.
//!
//! - `cluster_api`: task lookup, manifest create/replace, Installation status
//! - `version_source`: target and live application versions
//!
//! Both are traits so the reconciler can run against mocks or an in-memory
//! cluster in tests.

pub mod cluster_api;
pub mod version_source;

pub use cluster_api::{ClusterApi, CreateOutcome, KubeClusterApi};
pub use version_source::{KubeVersionSource, VersionSource};
