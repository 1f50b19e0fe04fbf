//! Multi-pass upgrade lifecycles.
//!
//! These tests chain reconciliations the way watch events would, with the
//! in-memory cluster playing the part of the upgrade task.

use crate::fake_cluster::{ApiCall, Harness, TARGET};
use installation_operator::controller::upgrade_state_machine::UpgradeEvent;
use installation_operator::crd::{InstallationPhase, StatusReason};

const TASK: &str = "app-upgrade-1-5-0";

// ============================================================================
// Happy Path
// ============================================================================

/// Installed 1.4.2 → Upgrading → task runs → Installed 1.5.0.
#[tokio::test]
async fn test_upgrade_from_installed_to_target() {
    let h = Harness::new(InstallationPhase::Installed, Some("1.4.2"));

    let started = h.reconcile().await.unwrap();
    assert_eq!(started.phase, InstallationPhase::Upgrading);

    let applied = h.reconcile().await.unwrap();
    assert_eq!(applied.event, Some(UpgradeEvent::TaskMissing));
    assert!(h.cluster.task().is_some());

    h.cluster.set_task_phase("Running");
    let running = h.reconcile().await.unwrap();
    assert_eq!(running.event, Some(UpgradeEvent::TaskRunning));

    h.cluster.set_task_phase("Succeeded");
    h.cluster.set_live_version(TARGET);
    let done = h.reconcile().await.unwrap();
    assert_eq!(done.phase, InstallationPhase::Installed);

    let settled = h.reconcile().await.unwrap();
    assert_eq!(settled.event, Some(UpgradeEvent::UpToDate));
    assert_eq!(h.cluster.status().version.as_deref(), Some(TARGET));
}

#[tokio::test]
async fn test_run_until_settled_stops_on_running_task() {
    let h = Harness::new(InstallationPhase::Installed, Some("1.4.2"));

    let phases = h.run_until_settled(5).await;

    // Start upgrade, then apply resources; the applied task is now pending
    assert_eq!(
        phases,
        vec![InstallationPhase::Upgrading, InstallationPhase::Upgrading]
    );
    assert!(h.cluster.task().is_some());
}

// ============================================================================
// Self-Healing
// ============================================================================

/// A task that exits successfully without moving the version is forced
/// again until the namespace reports the target.
#[tokio::test]
async fn test_silent_task_is_replaced_until_version_moves() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    h.reconcile().await.unwrap();

    h.cluster.set_task_phase("Succeeded");
    let mismatch = h.reconcile().await.unwrap();
    assert_eq!(mismatch.event, Some(UpgradeEvent::TaskSucceededVersionMismatch));
    assert!(h.cluster.status().force_upgrade);

    h.cluster.clear_calls();
    let forced = h.reconcile().await.unwrap();
    assert_eq!(forced.event, Some(UpgradeEvent::ForceRequested));
    assert!(h.cluster.calls().contains(&ApiCall::replace("Pod", TASK)));
    assert!(!h.cluster.status().force_upgrade);

    h.cluster.set_task_phase("Succeeded");
    h.cluster.set_live_version(TARGET);
    let done = h.reconcile().await.unwrap();
    assert_eq!(done.phase, InstallationPhase::Installed);
    assert_eq!(h.cluster.status().upgrade_attempts, 0);
}

// ============================================================================
// Failure and Recovery
// ============================================================================

/// Every failure backs off and retries until the attempts run out.
#[tokio::test]
async fn test_failures_exhaust_attempts_then_wait_for_admin() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    let max_attempts = h.ctx.config.upgrade_max_attempts;
    h.reconcile().await.unwrap();

    for attempt in 1..=max_attempts {
        h.cluster.set_task_phase("Failed");
        let failed = h.reconcile().await.unwrap();
        assert_eq!(failed.phase, InstallationPhase::UpgradeFailureBackoff);
        assert_eq!(h.cluster.status().upgrade_attempts, attempt);

        if attempt < max_attempts {
            h.cluster.expire_backoff();
            let retry = h.reconcile().await.unwrap();
            assert_eq!(retry.event, Some(UpgradeEvent::BackoffElapsed));
            let forced = h.reconcile().await.unwrap();
            assert_eq!(forced.event, Some(UpgradeEvent::ForceRequested));
        }
    }

    let gave_up = h.reconcile().await.unwrap();
    assert_eq!(gave_up.event, Some(UpgradeEvent::AttemptsExhausted));
    let status = h.cluster.status();
    assert_eq!(status.installation_phase, InstallationPhase::UpgradeFailed);
    assert_eq!(status.reason, StatusReason::TooManyUpgradeAttempts);

    // Terminal until someone intervenes
    h.cluster.clear_calls();
    let waiting = h.reconcile().await.unwrap();
    assert_eq!(waiting.phase, InstallationPhase::UpgradeFailed);
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn test_admin_force_recovers_failed_upgrade() {
    let h = Harness::new(InstallationPhase::UpgradeFailed, Some("1.4.2"));
    h.cluster.edit_status(|s| {
        s.upgrade_attempts = 5;
        s.reason = StatusReason::TooManyUpgradeAttempts;
    });
    h.cluster.request_force_upgrade();

    let retry = h.reconcile().await.unwrap();
    assert_eq!(retry.phase, InstallationPhase::Upgrading);
    assert_eq!(h.cluster.status().upgrade_attempts, 5);

    let applied = h.reconcile().await.unwrap();
    assert_eq!(applied.event, Some(UpgradeEvent::ForceRequested));
    assert!(h.cluster.task().is_some());

    h.cluster.set_task_phase("Succeeded");
    h.cluster.set_live_version(TARGET);
    let done = h.reconcile().await.unwrap();
    assert_eq!(done.phase, InstallationPhase::Installed);
    assert_eq!(h.cluster.status().upgrade_attempts, 0);
}

#[tokio::test]
async fn test_force_skips_pending_backoff() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    h.reconcile().await.unwrap();
    h.cluster.set_task_phase("Failed");
    h.reconcile().await.unwrap();
    h.cluster.request_force_upgrade();

    let outcome = h.reconcile().await.unwrap();

    assert_eq!(outcome.event, Some(UpgradeEvent::ForceRequested));
    assert_eq!(outcome.phase, InstallationPhase::Upgrading);
}

/// A forced re-upgrade at the current version completes on the next pass.
#[tokio::test]
async fn test_forced_reupgrade_at_current_version_completes() {
    let h = Harness::new(InstallationPhase::Installed, Some(TARGET));
    h.cluster.request_force_upgrade();

    let forced = h.reconcile().await.unwrap();
    assert_eq!(forced.phase, InstallationPhase::Upgrading);
    assert!(h.cluster.status().force_upgrade);

    let done = h.reconcile().await.unwrap();
    assert_eq!(done.event, Some(UpgradeEvent::AlreadyAtTarget));
    assert_eq!(done.phase, InstallationPhase::Installed);
    assert!(!h.cluster.status().force_upgrade);
}

// ============================================================================
// Redelivered Triggers
// ============================================================================

/// Two triggers carrying the same copy count one failed task once.
#[tokio::test]
async fn test_same_copy_twice_counts_failure_once() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    h.reconcile().await.unwrap();
    h.cluster.set_task_phase("Failed");
    let observed = h.cluster.installation();

    let first = h.reconcile_with(&observed).await.unwrap();
    assert_eq!(first.phase, InstallationPhase::UpgradeFailureBackoff);
    let second = h.reconcile_with(&observed).await.unwrap();
    assert_eq!(second.event, None);

    let status = h.cluster.status();
    assert_eq!(status.upgrade_attempts, 1);
    assert_eq!(status.installation_phase, InstallationPhase::UpgradeFailureBackoff);
}

/// An outdated backoff copy arriving after the retry started must not force
/// the running task to be replaced.
#[tokio::test]
async fn test_outdated_backoff_copy_leaves_running_retry_alone() {
    let h = Harness::new(InstallationPhase::Upgrading, Some("1.4.2"));
    h.reconcile().await.unwrap();
    h.cluster.set_task_phase("Failed");
    h.reconcile().await.unwrap();
    h.cluster.expire_backoff();
    let in_backoff = h.cluster.installation();

    let retry = h.reconcile().await.unwrap();
    assert_eq!(retry.event, Some(UpgradeEvent::BackoffElapsed));
    let forced = h.reconcile().await.unwrap();
    assert_eq!(forced.event, Some(UpgradeEvent::ForceRequested));
    h.cluster.set_task_phase("Running");
    h.cluster.clear_calls();

    let stale = h.reconcile_with(&in_backoff).await.unwrap();
    assert_eq!(stale.event, None);
    let status = h.cluster.status();
    assert_eq!(status.installation_phase, InstallationPhase::Upgrading);
    assert!(!status.force_upgrade);

    let next = h.reconcile().await.unwrap();
    assert_eq!(next.event, Some(UpgradeEvent::TaskRunning));
    assert!(!h.cluster.calls().contains(&ApiCall::replace("Pod", TASK)));
    assert!(h.cluster.calls().is_empty());
}
