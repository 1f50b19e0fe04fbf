//! Installation Custom Resource Definition.
//!
//! An `Installation` declares that the managed application should run in its
//! namespace. The controller owns `.status` and is its only writer, except for
//! the `forceUpgrade` flag which administrators may set to request a forced
//! re-upgrade.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Installation is a custom resource describing a desired deployment of the
/// managed application.
///
/// Example:
/// ```yaml
/// apiVersion: installation-operator.dev/v1alpha1
/// kind: Installation
/// metadata:
///   name: app
///   namespace: app-prod
/// spec:
///   registry: quay.io
///   resources:
///     memory: 512Mi
///   features:
///     monitoring: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "installation-operator.dev",
    version = "v1alpha1",
    kind = "Installation",
    plural = "installations",
    shortname = "inst",
    status = "InstallationStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.installationPhase"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Attempts", "type":"integer", "jsonPath":".status.upgradeAttempts"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Container registry the application images are pulled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Resource limits passed through to the rendered workloads.
    #[serde(default)]
    pub resources: ResourceLimitsSpec,

    /// Feature flags passed through to the rendered workloads.
    #[serde(default)]
    pub features: BTreeMap<String, bool>,

    /// Additional labels to apply to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations to apply to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Resource limits for the application workloads.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimitsSpec {
    /// Memory limit (e.g. "512Mi").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// CPU limit (e.g. "500m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
}

// ============================================================================
// Installation Status
// ============================================================================

/// Observed state of an Installation.
///
/// `lastUpgradeFailureTime` is serialized even when empty so that a merge
/// patch of the status clears it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Current lifecycle phase.
    #[serde(default)]
    pub installation_phase: InstallationPhase,

    /// Machine-readable reason for the current phase.
    #[serde(default)]
    pub reason: StatusReason,

    /// Human-readable description of the current phase.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Last version confirmed live in the namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Time of the last failed upgrade attempt (RFC 3339).
    #[serde(default)]
    pub last_upgrade_failure_time: Option<String>,

    /// Number of failed upgrade attempts since the last successful upgrade.
    #[serde(default)]
    pub upgrade_attempts: i32,

    /// One-shot request to re-apply the upgrade regardless of task state.
    #[serde(default)]
    pub force_upgrade: bool,

    /// Generation of the spec observed by the last status commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions representing the current state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Lifecycle phase of an Installation.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum InstallationPhase {
    /// No status recorded yet.
    #[default]
    Missing,
    /// Installer is creating the application resources.
    Installing,
    /// Resources created, waiting for the application to start.
    Starting,
    /// Application failed to start after install.
    StartupFailed,
    /// Application is installed and running the recorded version.
    Installed,
    /// Installation was rejected (e.g. a duplicate in the namespace).
    NotInstalled,
    /// An upgrade towards the controller's target version is in flight.
    Upgrading,
    /// The last upgrade task failed; waiting before the next attempt.
    UpgradeFailureBackoff,
    /// Upgrade attempts exhausted; waiting for an administrator.
    UpgradeFailed,
}

impl InstallationPhase {
    /// Phases driven by the upgrade controller.
    pub fn is_upgrade_lifecycle(&self) -> bool {
        matches!(
            self,
            InstallationPhase::Installed
                | InstallationPhase::Upgrading
                | InstallationPhase::UpgradeFailureBackoff
                | InstallationPhase::UpgradeFailed
        )
    }

    /// All phases, in declaration order.
    pub fn all() -> [InstallationPhase; 9] {
        [
            InstallationPhase::Missing,
            InstallationPhase::Installing,
            InstallationPhase::Starting,
            InstallationPhase::StartupFailed,
            InstallationPhase::Installed,
            InstallationPhase::NotInstalled,
            InstallationPhase::Upgrading,
            InstallationPhase::UpgradeFailureBackoff,
            InstallationPhase::UpgradeFailed,
        ]
    }
}

impl std::fmt::Display for InstallationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallationPhase::Missing => write!(f, "Missing"),
            InstallationPhase::Installing => write!(f, "Installing"),
            InstallationPhase::Starting => write!(f, "Starting"),
            InstallationPhase::StartupFailed => write!(f, "StartupFailed"),
            InstallationPhase::Installed => write!(f, "Installed"),
            InstallationPhase::NotInstalled => write!(f, "NotInstalled"),
            InstallationPhase::Upgrading => write!(f, "Upgrading"),
            InstallationPhase::UpgradeFailureBackoff => write!(f, "UpgradeFailureBackoff"),
            InstallationPhase::UpgradeFailed => write!(f, "UpgradeFailed"),
        }
    }
}

/// Classification of the current phase.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum StatusReason {
    /// No particular reason.
    #[default]
    Missing,
    /// Another Installation already exists in the namespace.
    Duplicate,
    /// The application deployments are not ready.
    DeploymentNotReady,
    /// The upgrade task terminated in the failed phase.
    UpgradePodFailed,
    /// The upgrade was retried the maximum number of times.
    TooManyUpgradeAttempts,
}

impl std::fmt::Display for StatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusReason::Missing => write!(f, "Missing"),
            StatusReason::Duplicate => write!(f, "Duplicate"),
            StatusReason::DeploymentNotReady => write!(f, "DeploymentNotReady"),
            StatusReason::UpgradePodFailed => write!(f, "UpgradePodFailed"),
            StatusReason::TooManyUpgradeAttempts => write!(f, "TooManyUpgradeAttempts"),
        }
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Condition describes the state of an installation at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    #[test]
    fn test_status_deserializes_with_defaults() {
        let status: InstallationStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(status.installation_phase, InstallationPhase::Missing);
        assert_eq!(status.reason, StatusReason::Missing);
        assert_eq!(status.upgrade_attempts, 0);
        assert!(!status.force_upgrade);
        assert!(status.last_upgrade_failure_time.is_none());
    }

    #[test]
    fn test_status_wire_names() {
        let status = InstallationStatus {
            installation_phase: InstallationPhase::UpgradeFailureBackoff,
            reason: StatusReason::UpgradePodFailed,
            version: Some("1.4.2".to_string()),
            last_upgrade_failure_time: Some("2026-01-01T00:00:00Z".to_string()),
            upgrade_attempts: 2,
            force_upgrade: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["installationPhase"], "UpgradeFailureBackoff");
        assert_eq!(value["reason"], "UpgradePodFailed");
        assert_eq!(value["version"], "1.4.2");
        assert_eq!(value["upgradeAttempts"], 2);
        assert_eq!(value["forceUpgrade"], true);
        assert_eq!(value["lastUpgradeFailureTime"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_cleared_failure_time_serializes_as_null() {
        let value = serde_json::to_value(InstallationStatus::default()).unwrap();
        assert!(value.get("lastUpgradeFailureTime").unwrap().is_null());
    }

    #[test]
    fn test_upgrade_lifecycle_phases() {
        assert!(InstallationPhase::Installed.is_upgrade_lifecycle());
        assert!(InstallationPhase::Upgrading.is_upgrade_lifecycle());
        assert!(InstallationPhase::UpgradeFailureBackoff.is_upgrade_lifecycle());
        assert!(InstallationPhase::UpgradeFailed.is_upgrade_lifecycle());
        assert!(!InstallationPhase::Installing.is_upgrade_lifecycle());
        assert!(!InstallationPhase::Missing.is_upgrade_lifecycle());
        assert!(!InstallationPhase::StartupFailed.is_upgrade_lifecycle());
    }

    #[test]
    fn test_phase_display_matches_serde() {
        for phase in InstallationPhase::all() {
            let wire = serde_json::to_value(phase).unwrap();
            assert_eq!(wire, serde_json::Value::String(phase.to_string()));
        }
    }

    #[test]
    fn test_spec_parses_declared_parameters() {
        let spec: InstallationSpec = serde_json::from_value(serde_json::json!({
            "registry": "quay.io",
            "resources": { "memory": "512Mi" },
            "features": { "monitoring": true }
        }))
        .unwrap();
        assert_eq!(spec.registry.as_deref(), Some("quay.io"));
        assert_eq!(spec.resources.memory.as_deref(), Some("512Mi"));
        assert!(spec.resources.cpu.is_none());
        assert_eq!(spec.features.get("monitoring"), Some(&true));
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "Installed", "Running 1.5.0", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.observed_generation, Some(1));
    }
}
