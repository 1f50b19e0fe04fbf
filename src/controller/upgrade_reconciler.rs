//! Upgrade reconciliation for Installation.
//!
//! Each pass observes the cluster (target and live versions, the upgrade
//! task), asks the state machine for the single transition that applies, and
//! carries out that transition's effect: apply the rendered resources, commit
//! status through the status store, or nothing at all. Every pass starts from
//! scratch, so re-running after a partial failure is safe. Effects are only
//! carried out while the stored status still matches the observed one, so a
//! trigger delivered twice with the same copy acts once.

use std::time::Duration;

use jiff::Timestamp;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::controller::backoff::{backoff_remaining, upgrade_backoff};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::upgrade_state_machine::{
    TaskObservation, TaskPhase, TransitionEffect, UpgradeEvent, UpgradeStateMachine,
    UpgradeTransition, UpgradeTransitionContext, apply_transition_to_status,
    determine_upgrade_event,
};
use crate::crd::{Installation, InstallationPhase, InstallationStatus};
use crate::resources::applier::apply_all;
use crate::resources::manifest::{Manifest, locate_task_mut, parse_all};

/// Result of one upgrade reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// Phase the installation was in.
    pub from: InstallationPhase,
    /// Phase the installation is in after this pass.
    pub phase: InstallationPhase,
    /// Event that drove the pass, if any.
    pub event: Option<UpgradeEvent>,
    /// Effect carried out.
    pub effect: TransitionEffect,
    /// Requested delay before the next pass, if the effect needs one.
    pub requeue_after: Option<Duration>,
}

impl UpgradeOutcome {
    fn unchanged(phase: InstallationPhase) -> Self {
        Self {
            from: phase,
            phase,
            event: None,
            effect: TransitionEffect::None,
            requeue_after: None,
        }
    }
}

/// Drive an installation one step through the upgrade lifecycle.
///
/// Dispatches on the recorded phase. Phases owned by the installer are left
/// untouched.
pub async fn reconcile_installation(
    installation: &Installation,
    ctx: &Context,
) -> Result<UpgradeOutcome> {
    let phase = current_phase(installation);
    match phase {
        InstallationPhase::Upgrading => reconcile_upgrade(installation, ctx).await,
        InstallationPhase::UpgradeFailureBackoff => handle_backoff_phase(installation, ctx).await,
        InstallationPhase::UpgradeFailed => handle_upgrade_failed_phase(installation, ctx).await,
        InstallationPhase::Installed => handle_installed_phase(installation, ctx).await,
        InstallationPhase::Missing
        | InstallationPhase::Installing
        | InstallationPhase::Starting
        | InstallationPhase::StartupFailed
        | InstallationPhase::NotInstalled => {
            debug!(
                name = %installation.name_any(),
                phase = %phase,
                "Phase is not part of the upgrade lifecycle, skipping"
            );
            Ok(UpgradeOutcome::unchanged(phase))
        }
    }
}

/// Reconcile an installation in the Upgrading phase.
///
/// 1. Resolve target and live versions.
/// 2. Render the upgrade resources and locate the task.
/// 3. Observe the task and pick the transition.
/// 4. Apply resources and/or commit status as the transition requires.
///
/// Failures in steps 1 and 2 abort the pass without touching status.
pub async fn reconcile_upgrade(installation: &Installation, ctx: &Context) -> Result<UpgradeOutcome> {
    let phase = current_phase(installation);
    if phase != InstallationPhase::Upgrading {
        return Ok(UpgradeOutcome::unchanged(phase));
    }

    let name = installation.name_any();
    let namespace = installation_namespace(installation)?;
    let status = installation.status.clone().unwrap_or_default();

    let target_version = ctx.versions.target_version().await?;
    let mut live_version = ctx.versions.live_version(&namespace).await?;

    let (manifests, task_name) = match prepare_upgrade_resources(installation, ctx, &target_version)
    {
        Ok(prepared) => prepared,
        Err(e) => {
            if e.is_template_defect() {
                error!(
                    name = %name,
                    namespace = %namespace,
                    target_version = %target_version,
                    error = %e,
                    "Upgrade resources are unusable; the bundled template is likely defective"
                );
            }
            return Err(e);
        }
    };

    let pod = ctx.cluster.get_pod(&namespace, &task_name).await?;
    let task = TaskObservation::from_pod(pod.as_ref());

    if !status.force_upgrade && task == TaskObservation::Present(TaskPhase::Succeeded) {
        // The task may have updated the version since it was first read
        live_version = ctx.versions.live_version(&namespace).await?;
    }

    let tctx = UpgradeTransitionContext {
        target_version,
        live_version,
        force_upgrade: status.force_upgrade,
        task,
        upgrade_attempts: status.upgrade_attempts,
        max_attempts: ctx.config.upgrade_max_attempts,
        backoff_elapsed: false,
    };

    debug!(
        name = %name,
        namespace = %namespace,
        task = %task_name,
        task_state = ?tctx.task,
        live_version = %tctx.live_version,
        target_version = %tctx.target_version,
        force = tctx.force_upgrade,
        "Observed upgrade state"
    );

    let transition = select_transition(phase, &tctx, ctx)?;
    execute_transition(installation, ctx, &transition, &tctx, &manifests, None).await
}

/// Reconcile an installation waiting out the backoff after a failed task.
pub async fn handle_backoff_phase(installation: &Installation, ctx: &Context) -> Result<UpgradeOutcome> {
    let status = installation.status.clone().unwrap_or_default();
    let target_version = ctx.versions.target_version().await?;

    let backoff = upgrade_backoff(
        status.upgrade_attempts,
        ctx.config.upgrade_backoff_base,
        ctx.config.upgrade_backoff_max,
    );
    let remaining = backoff_remaining(
        status.last_upgrade_failure_time.as_deref(),
        backoff,
        Timestamp::now(),
    );

    let tctx = UpgradeTransitionContext {
        target_version,
        live_version: status.version.clone().unwrap_or_default(),
        force_upgrade: status.force_upgrade,
        task: TaskObservation::Absent,
        upgrade_attempts: status.upgrade_attempts,
        max_attempts: ctx.config.upgrade_max_attempts,
        backoff_elapsed: remaining.is_none(),
    };

    let transition = select_transition(InstallationPhase::UpgradeFailureBackoff, &tctx, ctx)?;
    execute_transition(installation, ctx, &transition, &tctx, &[], remaining).await
}

/// Reconcile an installation that gave up upgrading.
///
/// Only a `forceUpgrade` request moves it on.
pub async fn handle_upgrade_failed_phase(
    installation: &Installation,
    ctx: &Context,
) -> Result<UpgradeOutcome> {
    let status = installation.status.clone().unwrap_or_default();
    if !status.force_upgrade {
        debug!(
            name = %installation.name_any(),
            attempts = status.upgrade_attempts,
            "Upgrade failed, waiting for forceUpgrade"
        );
        return Ok(UpgradeOutcome::unchanged(InstallationPhase::UpgradeFailed));
    }

    let tctx = UpgradeTransitionContext {
        target_version: ctx.versions.target_version().await?,
        live_version: status.version.clone().unwrap_or_default(),
        force_upgrade: true,
        upgrade_attempts: status.upgrade_attempts,
        max_attempts: ctx.config.upgrade_max_attempts,
        ..Default::default()
    };

    let transition = select_transition(InstallationPhase::UpgradeFailed, &tctx, ctx)?;
    execute_transition(installation, ctx, &transition, &tctx, &[], None).await
}

/// Reconcile an installed installation, starting an upgrade when the
/// controller ships a different version.
pub async fn handle_installed_phase(installation: &Installation, ctx: &Context) -> Result<UpgradeOutcome> {
    let namespace = installation_namespace(installation)?;
    let status = installation.status.clone().unwrap_or_default();

    let tctx = UpgradeTransitionContext {
        target_version: ctx.versions.target_version().await?,
        live_version: ctx.versions.live_version(&namespace).await?,
        force_upgrade: status.force_upgrade,
        upgrade_attempts: status.upgrade_attempts,
        max_attempts: ctx.config.upgrade_max_attempts,
        ..Default::default()
    };

    let transition = select_transition(InstallationPhase::Installed, &tctx, ctx)?;
    execute_transition(installation, ctx, &transition, &tctx, &[], None).await
}

// ============================================================================
// Helpers
// ============================================================================

fn current_phase(installation: &Installation) -> InstallationPhase {
    installation
        .status
        .as_ref()
        .map(|s| s.installation_phase)
        .unwrap_or_default()
}

fn installation_namespace(installation: &Installation) -> Result<String> {
    installation
        .namespace()
        .ok_or_else(|| Error::MissingField("Installation.metadata.namespace".to_string()))
}

/// Render the upgrade resources, locate the task and point it at the
/// configured service account.
///
/// Returns the manifests and the task's name.
fn prepare_upgrade_resources(
    installation: &Installation,
    ctx: &Context,
    target_version: &str,
) -> Result<(Vec<Manifest>, String)> {
    let raw = ctx.templates.render_upgrade(installation, target_version)?;
    let mut manifests = parse_all(&raw)?;

    let task = locate_task_mut(&mut manifests)?;
    let task_name = task.name_any();
    let spec = task
        .spec
        .as_mut()
        .ok_or_else(|| Error::Manifest(format!("upgrade task {task_name} has no spec")))?;
    spec.service_account_name = Some(ctx.config.task_service_account.clone());

    Ok((manifests, task_name))
}

/// Whether a stored status is still the one a transition was chosen from.
///
/// A trigger can carry an outdated copy of the installation; its transition
/// must not be applied on top of a status that already moved on.
fn observation_holds(
    stored: &InstallationStatus,
    transition: &UpgradeTransition,
    tctx: &UpgradeTransitionContext,
) -> bool {
    stored.installation_phase == transition.from
        && stored.force_upgrade == tctx.force_upgrade
        && stored.upgrade_attempts == tctx.upgrade_attempts
}

fn select_transition(
    phase: InstallationPhase,
    tctx: &UpgradeTransitionContext,
    ctx: &Context,
) -> Result<UpgradeTransition> {
    let event = determine_upgrade_event(phase, tctx).ok_or_else(|| {
        Error::Permanent(format!("no upgrade event applies in phase {phase}"))
    })?;
    ctx.state_machine
        .transition(phase, event, tctx)
        .ok_or_else(|| unmatched_transition(&ctx.state_machine, phase, event))
}

/// Error for an event the table has no passing transition for, naming the
/// events the phase does accept.
fn unmatched_transition(
    state_machine: &UpgradeStateMachine,
    phase: InstallationPhase,
    event: UpgradeEvent,
) -> Error {
    let accepted: Vec<String> = state_machine
        .transitions_from(phase)
        .iter()
        .map(|t| t.event.to_string())
        .collect();
    Error::Permanent(format!(
        "no valid transition from {phase} on {event} (accepted: {})",
        accepted.join(", ")
    ))
}

async fn execute_transition(
    installation: &Installation,
    ctx: &Context,
    transition: &UpgradeTransition,
    tctx: &UpgradeTransitionContext,
    manifests: &[Manifest],
    wait: Option<Duration>,
) -> Result<UpgradeOutcome> {
    let name = installation.name_any();
    let namespace = installation.namespace().unwrap_or_default();

    if transition.effect.applies_resources() {
        // Replacing resources for an outdated observation would restart a
        // task that a newer pass already started
        let fresh = ctx.status_store.read_fresh(installation).await?;
        let fresh_status = fresh.status.unwrap_or_default();
        if !observation_holds(&fresh_status, transition, tctx) {
            debug!(
                name = %name,
                namespace = %namespace,
                observed = %transition.from,
                stored = %fresh_status.installation_phase,
                event = %transition.event,
                "Installation changed since it was observed, skipping transition"
            );
            return Ok(UpgradeOutcome::unchanged(fresh_status.installation_phase));
        }

        apply_all(ctx.cluster.as_ref(), manifests, installation, true).await?;
        info!(
            name = %name,
            namespace = %namespace,
            count = manifests.len(),
            target_version = %tctx.target_version,
            "Applied upgrade resources"
        );
    }

    let mut attempts = tctx.upgrade_attempts;
    if transition.effect.mutates_status() {
        let now = Timestamp::now();
        let committed = ctx
            .status_store
            .commit(
                installation,
                |status| observation_holds(status, transition, tctx),
                |status| apply_transition_to_status(transition, status, tctx, now),
            )
            .await?;
        let Some(committed) = committed else {
            debug!(
                name = %name,
                namespace = %namespace,
                event = %transition.event,
                "Installation changed since it was observed, transition not committed"
            );
            return Ok(UpgradeOutcome::unchanged(transition.from));
        };
        if let Some(status) = committed.status.as_ref() {
            attempts = status.upgrade_attempts;
        }
    }

    if transition.from != transition.to {
        info!(
            name = %name,
            namespace = %namespace,
            from = %transition.from,
            to = %transition.to,
            event = %transition.event,
            "{}",
            transition.description
        );
    }

    publish_transition_event(installation, ctx, transition, tctx, attempts).await;

    if let Some(ref health_state) = ctx.health_state {
        let metrics = &health_state.metrics;
        if transition.from != transition.to {
            metrics.record_phase_transition(transition.from, transition.to);
        }
        if transition.effect == TransitionEffect::ApplyResourcesAndClearForce {
            metrics.record_forced_upgrade(&namespace, &name);
        }
        metrics.set_installation_state(&namespace, &name, transition.to, attempts);
    }

    let requeue_after = match transition.effect {
        TransitionEffect::WaitForBackoff => wait,
        _ => None,
    };

    Ok(UpgradeOutcome {
        from: transition.from,
        phase: transition.to,
        event: Some(transition.event),
        effect: transition.effect,
        requeue_after,
    })
}

async fn publish_transition_event(
    installation: &Installation,
    ctx: &Context,
    transition: &UpgradeTransition,
    tctx: &UpgradeTransitionContext,
    attempts: i32,
) {
    let target = &tctx.target_version;
    match transition.effect {
        TransitionEffect::StartUpgrade => {
            ctx.publish_normal_event(
                installation,
                "UpgradeStarted",
                "Upgrade",
                Some(format!("Upgrading from {} to {}", tctx.live_version, target)),
            )
            .await;
        }
        TransitionEffect::ApplyResources => {
            ctx.publish_normal_event(
                installation,
                "UpgradeResourcesApplied",
                "Upgrade",
                Some(format!("Applied upgrade resources for {target}")),
            )
            .await;
        }
        TransitionEffect::ApplyResourcesAndClearForce => {
            ctx.publish_normal_event(
                installation,
                "ForcedUpgrade",
                "Upgrade",
                Some(format!("Re-applied upgrade resources for {target}")),
            )
            .await;
        }
        TransitionEffect::CompleteUpgrade => {
            ctx.publish_normal_event(
                installation,
                "UpgradeCompleted",
                "Upgrade",
                Some(format!("Running version {target}")),
            )
            .await;
        }
        TransitionEffect::RequestForcedRetry => {
            warn!(
                name = %installation.name_any(),
                live_version = %tctx.live_version,
                target_version = %target,
                "Upgrade task succeeded but the live version did not change, forcing a re-apply"
            );
            ctx.publish_warning_event(
                installation,
                "VersionMismatch",
                "Upgrade",
                Some(format!(
                    "Upgrade task succeeded but version {} is live, expected {}",
                    tctx.live_version, target
                )),
            )
            .await;
        }
        TransitionEffect::RecordTaskFailure => {
            ctx.publish_warning_event(
                installation,
                "UpgradePodFailed",
                "Upgrade",
                Some(format!("Upgrade to {target} failed (attempt {attempts})")),
            )
            .await;
        }
        TransitionEffect::RetryForced => {
            ctx.publish_normal_event(
                installation,
                "UpgradeRetry",
                "Upgrade",
                Some(format!("Retrying upgrade to {target}")),
            )
            .await;
        }
        TransitionEffect::GiveUp => {
            ctx.publish_warning_event(
                installation,
                "TooManyUpgradeAttempts",
                "Upgrade",
                Some(format!(
                    "Upgrade to {target} failed {attempts} times, set status.forceUpgrade to retry"
                )),
            )
            .await;
        }
        TransitionEffect::None | TransitionEffect::WaitForBackoff => {}
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
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use kube::api::ObjectMeta;

    use super::*;
    use crate::client::CreateOutcome;
    use crate::client::cluster_api::MockClusterApi;
    use crate::client::version_source::MockVersionSource;
    use crate::config::OperatorConfig;
    use crate::crd::{InstallationSpec, StatusReason};
    use crate::resources::template::Templates;

    fn installation(status: InstallationStatus) -> Installation {
        Installation {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("app-prod".to_string()),
                uid: Some("uid-1".to_string()),
                resource_version: Some("10".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            spec: InstallationSpec::default(),
            status: Some(status),
        }
    }

    fn upgrading() -> InstallationStatus {
        InstallationStatus {
            installation_phase: InstallationPhase::Upgrading,
            version: Some("1.4.2".to_string()),
            ..Default::default()
        }
    }

    fn versions(live: &'static str) -> MockVersionSource {
        let mut source = MockVersionSource::new();
        source
            .expect_bundled_template_version()
            .returning(|| Ok("1.5.0".to_string()));
        source
            .expect_namespace_version()
            .returning(move |_| Ok(live.to_string()));
        source
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app-upgrade-1-5-0".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn context(cluster: MockClusterApi, source: MockVersionSource) -> Context {
        Context::with_collaborators(
            Arc::new(cluster),
            Arc::new(source),
            Arc::new(Templates::bundled().unwrap()),
            OperatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_absent_task_applies_all_resources_with_replace() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_pod().returning(|_, _| Ok(None));
        cluster
            .expect_create()
            .times(2)
            .returning(|_| Ok(CreateOutcome::AlreadyExists));
        cluster.expect_replace().times(2).returning(|_| Ok(()));
        cluster
            .expect_get_installation()
            .times(1)
            .returning(|_, _| Ok(installation(upgrading())));
        cluster.expect_update_status().never();

        let ctx = context(cluster, versions("1.4.2"));
        let outcome = reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.event, Some(UpgradeEvent::TaskMissing));
        assert_eq!(outcome.phase, InstallationPhase::Upgrading);
    }

    #[tokio::test]
    async fn test_task_gets_configured_service_account() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_pod().returning(|_, _| Ok(None));
        cluster
            .expect_get_installation()
            .returning(|_, _| Ok(installation(upgrading())));
        cluster
            .expect_create()
            .withf(|m| match m {
                Manifest::Task(pod) => {
                    pod.spec.as_ref().unwrap().service_account_name.as_deref()
                        == Some("installation-operator")
                }
                _ => true,
            })
            .times(2)
            .returning(|_| Ok(CreateOutcome::Created));

        let ctx = context(cluster, versions("1.4.2"));
        reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_running_task_is_a_no_op() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_pod()
            .returning(|_, _| Ok(Some(pod("Running"))));
        cluster.expect_create().never();
        cluster.expect_update_status().never();

        let ctx = context(cluster, versions("1.4.2"));
        let outcome = reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.event, Some(UpgradeEvent::TaskRunning));
        assert_eq!(outcome.effect, TransitionEffect::None);
    }

    #[tokio::test]
    async fn test_failed_task_enters_backoff() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_pod()
            .returning(|_, _| Ok(Some(pod("Failed"))));
        cluster
            .expect_get_installation()
            .returning(|_, _| Ok(installation(upgrading())));
        cluster
            .expect_update_status()
            .withf(|i| {
                let s = i.status.as_ref().unwrap();
                s.installation_phase == InstallationPhase::UpgradeFailureBackoff
                    && s.reason == StatusReason::UpgradePodFailed
                    && s.upgrade_attempts == 1
                    && s.last_upgrade_failure_time.is_some()
            })
            .times(1)
            .returning(|i| Ok(i.clone()));

        let ctx = context(cluster, versions("1.4.2"));
        let outcome = reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.phase, InstallationPhase::UpgradeFailureBackoff);
    }

    #[tokio::test]
    async fn test_missing_task_manifest_leaves_status_untouched() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_pod().never();
        cluster.expect_create().never();
        cluster.expect_update_status().never();

        let templates = Templates::from_sources(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ app }}-config\n",
            "name: app\nversion: 1.5.0\n",
        )
        .unwrap();
        let ctx = Context::with_collaborators(
            Arc::new(cluster),
            Arc::new(versions("1.4.2")),
            Arc::new(templates),
            OperatorConfig::default(),
        );

        let err = reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound));
    }

    #[tokio::test]
    async fn test_unresolved_version_aborts_before_observing_task() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_pod().never();

        let mut source = MockVersionSource::new();
        source
            .expect_bundled_template_version()
            .returning(|| Ok("1.5.0".to_string()));
        source
            .expect_namespace_version()
            .returning(|_| Err(Error::VersionUnresolved("missing".to_string())));

        let ctx = context(cluster, source);
        let err = reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionUnresolved(_)));
    }

    #[tokio::test]
    async fn test_other_phases_are_not_touched() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_pod().never();
        cluster.expect_update_status().never();
        let ctx = context(cluster, MockVersionSource::new());

        let status = InstallationStatus {
            installation_phase: InstallationPhase::Installing,
            ..Default::default()
        };
        let outcome = reconcile_installation(&installation(status.clone()), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome, UpgradeOutcome::unchanged(InstallationPhase::Installing));

        let outcome = reconcile_upgrade(&installation(status), &ctx).await.unwrap();
        assert!(outcome.event.is_none());
    }

    #[tokio::test]
    async fn test_pending_backoff_requeues_for_remaining_time() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_update_status().never();

        let ctx = context(cluster, versions("1.4.2"));
        let status = InstallationStatus {
            installation_phase: InstallationPhase::UpgradeFailureBackoff,
            reason: StatusReason::UpgradePodFailed,
            last_upgrade_failure_time: Some(Timestamp::now().to_string()),
            upgrade_attempts: 1,
            ..Default::default()
        };
        let outcome = reconcile_installation(&installation(status), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.event, Some(UpgradeEvent::BackoffPending));
        let wait = outcome.requeue_after.unwrap();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_upgrade_failed_without_force_waits() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_update_status().never();
        let ctx = context(cluster, MockVersionSource::new());

        let status = InstallationStatus {
            installation_phase: InstallationPhase::UpgradeFailed,
            upgrade_attempts: 5,
            ..Default::default()
        };
        let outcome = reconcile_installation(&installation(status), &ctx)
            .await
            .unwrap();
        assert!(outcome.event.is_none());
        assert_eq!(outcome.phase, InstallationPhase::UpgradeFailed);
    }

    #[tokio::test]
    async fn test_outdated_copy_does_not_count_failure_twice() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_pod()
            .returning(|_, _| Ok(Some(pod("Failed"))));
        cluster.expect_get_installation().returning(|_, _| {
            let mut stored = upgrading();
            stored.installation_phase = InstallationPhase::UpgradeFailureBackoff;
            stored.upgrade_attempts = 1;
            Ok(installation(stored))
        });
        cluster.expect_update_status().never();

        let ctx = context(cluster, versions("1.4.2"));
        let outcome = reconcile_upgrade(&installation(upgrading()), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.phase, InstallationPhase::UpgradeFailureBackoff);
        assert!(outcome.event.is_none());
    }

    #[tokio::test]
    async fn test_outdated_force_does_not_replace_resources() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_pod()
            .returning(|_, _| Ok(Some(pod("Running"))));
        cluster
            .expect_get_installation()
            .returning(|_, _| Ok(installation(upgrading())));
        cluster.expect_create().never();
        cluster.expect_replace().never();
        cluster.expect_update_status().never();

        let mut forced = upgrading();
        forced.force_upgrade = true;
        let ctx = context(cluster, versions("1.4.2"));
        let outcome = reconcile_upgrade(&installation(forced), &ctx).await.unwrap();
        assert_eq!(outcome, UpgradeOutcome::unchanged(InstallationPhase::Upgrading));
    }

    #[test]
    fn test_unmatched_transition_names_accepted_events() {
        let err = unmatched_transition(
            &UpgradeStateMachine::new(),
            InstallationPhase::UpgradeFailed,
            UpgradeEvent::TaskFailed,
        );
        let message = err.to_string();
        assert!(matches!(err, Error::Permanent(_)));
        assert!(message.contains("UpgradeFailed on TaskFailed"));
        assert!(message.contains("ForceRequested"));
    }
}
