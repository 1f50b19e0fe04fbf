//! Single-pass upgrade scenarios.
//!
//! Each test sets up one situation an Installation can be in and checks the
//! cluster calls and the committed status after one reconciliation.

use std::time::Duration;

use crate::fake_cluster::{ApiCall, Harness, NAMESPACE, TARGET, UID};
use installation_operator::controller::error::Error;
use installation_operator::controller::status::is_condition_true;
use installation_operator::controller::upgrade_state_machine::{TransitionEffect, UpgradeEvent};
use installation_operator::crd::{InstallationPhase, StatusReason};
use installation_operator::resources::template::Templates;

const CONFIG_MAP: &str = "app-upgrade-config";
const TASK: &str = "app-upgrade-1-5-0";

/// Upgrading with the task already applied and reported in `phase`.
async fn with_task(live: &str, phase: &str) -> Harness {
    let h = Harness::new(InstallationPhase::Upgrading, Some(live));
    h.reconcile().await.unwrap();
    h.cluster.set_task_phase(phase);
    h.cluster.clear_calls();
    h
}

#[tokio::test]
async fn test_already_current_completes_without_applying() {
    let h = Harness::new(InstallationPhase::Upgrading, Some(TARGET));

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.phase, InstallationPhase::Installed);
    assert_eq!(outcome.event, Some(UpgradeEvent::AlreadyAtTarget));
    assert_eq!(h.cluster.calls(), vec![ApiCall::UpdateStatus]);

    let status = h.cluster.status();
    assert_eq!(status.version.as_deref(), Some(TARGET));
    assert_eq!(status.upgrade_attempts, 0);
    assert!(!status.force_upgrade);
    assert!(is_condition_true(&status.conditions, "Ready"));
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn test_new_version_without_task_applies_all_manifests() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.phase, InstallationPhase::Upgrading);
    assert_eq!(outcome.effect, TransitionEffect::ApplyResources);
    assert_eq!(
        h.cluster.calls(),
        vec![
            ApiCall::create("ConfigMap", CONFIG_MAP),
            ApiCall::create("Pod", TASK),
        ]
    );
    assert_eq!(h.status_writes(), 0);
    assert_eq!(h.phase(), InstallationPhase::Upgrading);
}

#[tokio::test]
async fn test_applied_task_is_owned_and_uses_operator_service_account() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    h.reconcile().await.unwrap();

    let task = h.cluster.task().unwrap();
    assert_eq!(task.metadata.namespace.as_deref(), Some(NAMESPACE));
    assert_eq!(
        task.spec.as_ref().unwrap().service_account_name.as_deref(),
        Some("installation-operator")
    );
    let owners = task.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].uid, UID);
    assert_eq!(owners[0].kind, "Installation");
    assert_eq!(owners[0].controller, Some(true));
}

#[tokio::test]
async fn test_running_task_is_left_alone() {
    let h = with_task("1.4.2", "Running").await;

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::TaskRunning));
    assert_eq!(outcome.effect, TransitionEffect::None);
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_pending_task_counts_as_running() {
    let h = with_task("1.4.2", "Pending").await;

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::TaskRunning));
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let h = with_task("1.4.2", "Running").await;
    let before = h.cluster.installation();

    let first = h.reconcile().await.unwrap();
    let second = h.reconcile().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.cluster.installation().status, before.status);
    assert_eq!(
        h.cluster.installation().metadata.resource_version,
        before.metadata.resource_version
    );
}

#[tokio::test]
async fn test_force_replaces_every_manifest_and_clears_flag() {
    let h = with_task("1.4.2", "Failed").await;
    h.cluster.request_force_upgrade();

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::ForceRequested));
    assert_eq!(outcome.phase, InstallationPhase::Upgrading);
    let calls = h.cluster.calls();
    assert!(calls.contains(&ApiCall::replace("ConfigMap", CONFIG_MAP)));
    assert!(calls.contains(&ApiCall::replace("Pod", TASK)));
    assert!(!h.cluster.status().force_upgrade);

    // The failed pod was swapped for a fresh one
    let task = h.cluster.task().unwrap();
    assert!(task.status.is_none());
}

#[tokio::test]
async fn test_failed_task_enters_backoff() {
    let h = with_task("1.4.2", "Failed").await;

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.phase, InstallationPhase::UpgradeFailureBackoff);
    let status = h.cluster.status();
    assert_eq!(status.upgrade_attempts, 1);
    assert_eq!(status.reason, StatusReason::UpgradePodFailed);
    let failed_at: jiff::Timestamp = status.last_upgrade_failure_time.unwrap().parse().unwrap();
    assert!(jiff::Timestamp::now().as_second() - failed_at.as_second() < 60);
    assert!(is_condition_true(&status.conditions, "Degraded"));
}

#[tokio::test]
async fn test_succeeded_task_with_stale_version_requests_force() {
    let h = with_task("1.4.2", "Succeeded").await;

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::TaskSucceededVersionMismatch));
    assert_eq!(outcome.phase, InstallationPhase::Upgrading);
    let status = h.cluster.status();
    assert!(status.force_upgrade);
    assert_eq!(status.installation_phase, InstallationPhase::Upgrading);
    assert_eq!(status.version.as_deref(), Some("1.4.2"));
}

#[tokio::test]
async fn test_succeeded_task_with_target_version_completes() {
    let h = with_task("1.4.2", "Succeeded").await;
    h.cluster.edit_status(|s| {
        s.upgrade_attempts = 2;
        s.last_upgrade_failure_time = Some("2026-10-17T10:00:00Z".to_string());
    });
    h.cluster.set_live_version(TARGET);

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::TaskSucceeded));
    let status = h.cluster.status();
    assert_eq!(status.installation_phase, InstallationPhase::Installed);
    assert_eq!(status.version.as_deref(), Some(TARGET));
    assert_eq!(status.upgrade_attempts, 0);
    assert_eq!(status.last_upgrade_failure_time, None);
    assert!(!status.force_upgrade);
    assert_eq!(status.description, format!("Running version {TARGET}"));
}

#[tokio::test]
async fn test_template_without_task_leaves_status_untouched() {
    let config_map_only = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ app }}-config\ndata:\n  version: \"{{ version }}\"\n";
    let templates = Templates::from_sources(config_map_only, "name: app\nversion: 1.5.0\n").unwrap();
    let h = Harness::with_templates(InstallationPhase::Upgrading, Some("1.4.2"), templates);
    let before = h.cluster.installation();

    let err = h.reconcile().await.unwrap_err();

    assert!(matches!(err, Error::TaskNotFound));
    assert!(h.cluster.calls().is_empty());
    assert_eq!(h.cluster.installation().status, before.status);
}

#[tokio::test]
async fn test_unresolved_live_version_aborts_pass() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    h.cluster.clear_live_version();

    let err = h.reconcile().await.unwrap_err();

    assert!(matches!(err, Error::VersionUnresolved(_)));
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_status_conflict_is_retried_with_fresh_copy() {
    let h = with_task("1.4.2", "Failed").await;
    h.cluster.conflict_next_status_writes(1);

    h.reconcile().await.unwrap();

    assert_eq!(h.status_writes(), 2);
    assert_eq!(h.phase(), InstallationPhase::UpgradeFailureBackoff);
    assert_eq!(h.cluster.status().upgrade_attempts, 1);
}

#[tokio::test]
async fn test_persistent_conflict_gives_up() {
    let h = with_task("1.4.2", "Failed").await;
    h.cluster.conflict_next_status_writes(10);

    let err = h.reconcile().await.unwrap_err();

    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(h.status_writes(), 3);
    assert_eq!(h.phase(), InstallationPhase::Upgrading);
}

#[tokio::test]
async fn test_pending_backoff_requeues_at_remaining_time() {
    let h = with_task("1.4.2", "Failed").await;
    h.reconcile().await.unwrap();
    h.cluster.clear_calls();

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::BackoffPending));
    assert_eq!(outcome.phase, InstallationPhase::UpgradeFailureBackoff);
    let wait = outcome.requeue_after.unwrap();
    assert!(wait <= Duration::from_secs(60));
    assert!(wait > Duration::from_secs(50));
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_elapsed_backoff_retries_with_force() {
    let h = with_task("1.4.2", "Failed").await;
    h.reconcile().await.unwrap();
    h.cluster.expire_backoff();

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::BackoffElapsed));
    let status = h.cluster.status();
    assert_eq!(status.installation_phase, InstallationPhase::Upgrading);
    assert!(status.force_upgrade);
    assert_eq!(status.upgrade_attempts, 1);
}

#[tokio::test]
async fn test_installed_detects_new_version() {
    let h = Harness::new(InstallationPhase::Installed, Some("1.4.2"));

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::NewVersionAvailable));
    let status = h.cluster.status();
    assert_eq!(status.installation_phase, InstallationPhase::Upgrading);
    assert!(status.description.contains("1.4.2"));
    assert!(status.description.contains(TARGET));
}

#[tokio::test]
async fn test_installed_up_to_date_writes_nothing() {
    let h = Harness::new(InstallationPhase::Installed, Some(TARGET));

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::UpToDate));
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_installer_phases_are_not_touched() {
    for phase in [
        InstallationPhase::Missing,
        InstallationPhase::Installing,
        InstallationPhase::Starting,
        InstallationPhase::StartupFailed,
        InstallationPhase::NotInstalled,
    ] {
        let h = Harness::new(phase, None);
        let outcome = h.reconcile().await.unwrap();
        assert_eq!(outcome.phase, phase);
        assert_eq!(outcome.event, None);
        assert!(h.cluster.calls().is_empty(), "{phase}");
    }
}
