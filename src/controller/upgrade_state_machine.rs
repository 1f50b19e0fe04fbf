//! State machine for Installation upgrade phase transitions.
//!
//! The upgrade lifecycle is an explicit table of
//! `(phase, event) -> (next phase, effect)`. Observations about the cluster
//! (versions, the upgrade task, backoff timing) are gathered into an
//! [`UpgradeTransitionContext`], [`determine_upgrade_event`] picks the single
//! event that applies, and the matching [`UpgradeTransition`] tells the
//! reconciler which side effect to carry out.

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Pod;

use crate::crd::{InstallationPhase, InstallationStatus, StatusReason};

// ============================================================================
// Upgrade Task Observation
// ============================================================================

/// Lifecycle phase of the upgrade task pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskPhase {
    /// Phase reported in a pod's status.
    pub fn from_pod(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => TaskPhase::Pending,
            Some("Running") => TaskPhase::Running,
            Some("Succeeded") => TaskPhase::Succeeded,
            Some("Failed") => TaskPhase::Failed,
            _ => TaskPhase::Unknown,
        }
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Pending => write!(f, "Pending"),
            TaskPhase::Running => write!(f, "Running"),
            TaskPhase::Succeeded => write!(f, "Succeeded"),
            TaskPhase::Failed => write!(f, "Failed"),
            TaskPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What the cluster reports about the upgrade task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskObservation {
    /// No task with the rendered name exists.
    #[default]
    Absent,
    /// The task exists in the given phase.
    Present(TaskPhase),
}

impl TaskObservation {
    /// Observation for an optional pod lookup result.
    pub fn from_pod(pod: Option<&Pod>) -> Self {
        pod.map_or(TaskObservation::Absent, |p| {
            TaskObservation::Present(TaskPhase::from_pod(p))
        })
    }
}

// ============================================================================
// Upgrade Events
// ============================================================================

/// Events that can trigger upgrade phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeEvent {
    /// The live version already equals the target version.
    AlreadyAtTarget,

    /// No upgrade task exists yet.
    TaskMissing,

    /// An administrator (or the controller itself) set `forceUpgrade`.
    ForceRequested,

    /// The task succeeded and the namespace reports the target version.
    TaskSucceeded,

    /// The task succeeded but the namespace still reports another version.
    TaskSucceededVersionMismatch,

    /// The task terminated in the failed phase.
    TaskFailed,

    /// The task is pending or running.
    TaskRunning,

    /// The backoff after a failed attempt has elapsed.
    BackoffElapsed,

    /// Still waiting for the backoff to elapse.
    BackoffPending,

    /// The maximum number of attempts has been reached.
    AttemptsExhausted,

    /// The controller ships a version different from the live one.
    NewVersionAvailable,

    /// The live version equals the controller's version.
    UpToDate,
}

impl std::fmt::Display for UpgradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradeEvent::AlreadyAtTarget => write!(f, "AlreadyAtTarget"),
            UpgradeEvent::TaskMissing => write!(f, "TaskMissing"),
            UpgradeEvent::ForceRequested => write!(f, "ForceRequested"),
            UpgradeEvent::TaskSucceeded => write!(f, "TaskSucceeded"),
            UpgradeEvent::TaskSucceededVersionMismatch => {
                write!(f, "TaskSucceededVersionMismatch")
            }
            UpgradeEvent::TaskFailed => write!(f, "TaskFailed"),
            UpgradeEvent::TaskRunning => write!(f, "TaskRunning"),
            UpgradeEvent::BackoffElapsed => write!(f, "BackoffElapsed"),
            UpgradeEvent::BackoffPending => write!(f, "BackoffPending"),
            UpgradeEvent::AttemptsExhausted => write!(f, "AttemptsExhausted"),
            UpgradeEvent::NewVersionAvailable => write!(f, "NewVersionAvailable"),
            UpgradeEvent::UpToDate => write!(f, "UpToDate"),
        }
    }
}

// ============================================================================
// Transition Effects
// ============================================================================

/// Side effect the reconciler performs for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Nothing to do.
    None,
    /// Apply every rendered manifest, replacing existing objects.
    ApplyResources,
    /// Apply every rendered manifest, then clear `forceUpgrade`.
    ApplyResourcesAndClearForce,
    /// Record the upgrade as complete.
    CompleteUpgrade,
    /// Set `forceUpgrade` so the next pass re-applies the resources.
    RequestForcedRetry,
    /// Record a failed task and enter backoff.
    RecordTaskFailure,
    /// Return to Upgrading with `forceUpgrade` set.
    RetryForced,
    /// Stop retrying and wait for an administrator.
    GiveUp,
    /// Begin an upgrade towards the target version.
    StartUpgrade,
    /// Requeue once the backoff elapses.
    WaitForBackoff,
}

impl TransitionEffect {
    /// Whether the effect writes Installation status.
    pub fn mutates_status(&self) -> bool {
        !matches!(
            self,
            TransitionEffect::None
                | TransitionEffect::ApplyResources
                | TransitionEffect::WaitForBackoff
        )
    }

    /// Whether the effect applies the rendered resources.
    pub fn applies_resources(&self) -> bool {
        matches!(
            self,
            TransitionEffect::ApplyResources | TransitionEffect::ApplyResourcesAndClearForce
        )
    }
}

// ============================================================================
// Transition Context
// ============================================================================

/// Context data used to pick events and evaluate transition guards.
#[derive(Debug, Clone, Default)]
pub struct UpgradeTransitionContext {
    /// Version the controller upgrades to.
    pub target_version: String,

    /// Version currently live in the namespace.
    pub live_version: String,

    /// Whether `forceUpgrade` is set.
    pub force_upgrade: bool,

    /// Observed state of the upgrade task.
    pub task: TaskObservation,

    /// Failed attempts recorded so far.
    pub upgrade_attempts: i32,

    /// Attempts after which the upgrade is given up.
    pub max_attempts: i32,

    /// Whether the backoff after the last failure has elapsed.
    pub backoff_elapsed: bool,
}

impl UpgradeTransitionContext {
    /// Exact string comparison of live and target versions.
    pub fn versions_match(&self) -> bool {
        self.live_version == self.target_version
    }

    /// Whether another attempt is allowed.
    pub fn attempts_exhausted(&self) -> bool {
        self.upgrade_attempts >= self.max_attempts
    }
}

// ============================================================================
// Upgrade Transition
// ============================================================================

/// Represents a single state transition.
#[derive(Debug, Clone)]
pub struct UpgradeTransition {
    /// Source phase.
    pub from: InstallationPhase,

    /// Target phase.
    pub to: InstallationPhase,

    /// Event that triggers this transition.
    pub event: UpgradeEvent,

    /// Side effect carried out by the reconciler.
    pub effect: TransitionEffect,

    /// Human-readable description.
    pub description: &'static str,
}

// ============================================================================
// Upgrade State Machine
// ============================================================================

/// State machine for Installation upgrade phases.
#[derive(Debug, Clone, Default)]
pub struct UpgradeStateMachine {
    /// All valid transitions.
    transitions: Vec<UpgradeTransition>,
}

impl UpgradeStateMachine {
    /// Create a new state machine with all valid transitions.
    pub fn new() -> Self {
        use InstallationPhase::{Installed, UpgradeFailed, UpgradeFailureBackoff, Upgrading};

        let t = |from, to, event, effect, description| UpgradeTransition {
            from,
            to,
            event,
            effect,
            description,
        };

        let transitions = vec![
            // From Upgrading
            t(
                Upgrading,
                Installed,
                UpgradeEvent::AlreadyAtTarget,
                TransitionEffect::CompleteUpgrade,
                "Namespace already runs the target version",
            ),
            t(
                Upgrading,
                Upgrading,
                UpgradeEvent::TaskMissing,
                TransitionEffect::ApplyResources,
                "Apply upgrade resources and start the upgrade task",
            ),
            t(
                Upgrading,
                Upgrading,
                UpgradeEvent::ForceRequested,
                TransitionEffect::ApplyResourcesAndClearForce,
                "Forced re-apply of upgrade resources",
            ),
            t(
                Upgrading,
                Installed,
                UpgradeEvent::TaskSucceeded,
                TransitionEffect::CompleteUpgrade,
                "Upgrade task succeeded",
            ),
            t(
                Upgrading,
                Upgrading,
                UpgradeEvent::TaskSucceededVersionMismatch,
                TransitionEffect::RequestForcedRetry,
                "Upgrade task succeeded but the version did not change",
            ),
            t(
                Upgrading,
                UpgradeFailureBackoff,
                UpgradeEvent::TaskFailed,
                TransitionEffect::RecordTaskFailure,
                "Upgrade task failed, backing off",
            ),
            t(
                Upgrading,
                Upgrading,
                UpgradeEvent::TaskRunning,
                TransitionEffect::None,
                "Upgrade task still running",
            ),
            // From UpgradeFailureBackoff
            t(
                UpgradeFailureBackoff,
                Upgrading,
                UpgradeEvent::ForceRequested,
                TransitionEffect::RetryForced,
                "Forced retry skips the backoff",
            ),
            t(
                UpgradeFailureBackoff,
                Upgrading,
                UpgradeEvent::BackoffElapsed,
                TransitionEffect::RetryForced,
                "Backoff elapsed, retrying upgrade",
            ),
            t(
                UpgradeFailureBackoff,
                UpgradeFailureBackoff,
                UpgradeEvent::BackoffPending,
                TransitionEffect::WaitForBackoff,
                "Waiting for backoff to elapse",
            ),
            t(
                UpgradeFailureBackoff,
                UpgradeFailed,
                UpgradeEvent::AttemptsExhausted,
                TransitionEffect::GiveUp,
                "Too many failed attempts, giving up",
            ),
            // From UpgradeFailed
            t(
                UpgradeFailed,
                Upgrading,
                UpgradeEvent::ForceRequested,
                TransitionEffect::RetryForced,
                "Administrator forced a new upgrade attempt",
            ),
            // From Installed
            t(
                Installed,
                Upgrading,
                UpgradeEvent::NewVersionAvailable,
                TransitionEffect::StartUpgrade,
                "New version available, starting upgrade",
            ),
            t(
                Installed,
                Upgrading,
                UpgradeEvent::ForceRequested,
                TransitionEffect::RetryForced,
                "Administrator forced a re-upgrade",
            ),
            t(
                Installed,
                Installed,
                UpgradeEvent::UpToDate,
                TransitionEffect::None,
                "Installation is up to date",
            ),
        ];

        Self { transitions }
    }

    /// Attempt to transition from one phase given an event.
    ///
    /// Returns the transition if valid, None otherwise.
    pub fn transition(
        &self,
        from: InstallationPhase,
        event: UpgradeEvent,
        ctx: &UpgradeTransitionContext,
    ) -> Option<UpgradeTransition> {
        // Find matching transition
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == from && t.event == event)?;

        // Evaluate guards
        if !self.evaluate_guards(transition, ctx) {
            return None;
        }

        Some(transition.clone())
    }

    /// Evaluate guards for a transition.
    fn evaluate_guards(&self, transition: &UpgradeTransition, ctx: &UpgradeTransitionContext) -> bool {
        match transition.event {
            // Completion requires the namespace to report the target version
            UpgradeEvent::AlreadyAtTarget | UpgradeEvent::TaskSucceeded | UpgradeEvent::UpToDate => {
                ctx.versions_match()
            }
            UpgradeEvent::TaskSucceededVersionMismatch | UpgradeEvent::NewVersionAvailable => {
                !ctx.versions_match()
            }
            UpgradeEvent::ForceRequested => ctx.force_upgrade,
            UpgradeEvent::TaskMissing => ctx.task == TaskObservation::Absent,
            UpgradeEvent::TaskFailed => ctx.task == TaskObservation::Present(TaskPhase::Failed),
            UpgradeEvent::BackoffElapsed => ctx.backoff_elapsed && !ctx.attempts_exhausted(),
            UpgradeEvent::BackoffPending => !ctx.backoff_elapsed && !ctx.attempts_exhausted(),
            UpgradeEvent::AttemptsExhausted => ctx.attempts_exhausted(),
            UpgradeEvent::TaskRunning => true,
        }
    }

    /// Get all transitions from a phase.
    pub fn transitions_from(&self, phase: InstallationPhase) -> Vec<&UpgradeTransition> {
        self.transitions
            .iter()
            .filter(|t| t.from == phase)
            .collect()
    }
}

/// Determine the upgrade event for a phase.
///
/// Event priority in Upgrading:
/// 1. Task absent or force set: already at target, else forced or fresh apply
/// 2. Task succeeded: version match decides completion or forced retry
/// 3. Task failed
/// 4. Otherwise the task is still running
///
/// In UpgradeFailureBackoff a force request wins over exhausted attempts,
/// which win over the backoff timer. Phases outside the upgrade lifecycle
/// have no events.
pub fn determine_upgrade_event(
    phase: InstallationPhase,
    ctx: &UpgradeTransitionContext,
) -> Option<UpgradeEvent> {
    match phase {
        InstallationPhase::Upgrading => {
            if ctx.force_upgrade || ctx.task == TaskObservation::Absent {
                return Some(if ctx.versions_match() {
                    UpgradeEvent::AlreadyAtTarget
                } else if ctx.force_upgrade {
                    UpgradeEvent::ForceRequested
                } else {
                    UpgradeEvent::TaskMissing
                });
            }

            match ctx.task {
                TaskObservation::Present(TaskPhase::Succeeded) if ctx.versions_match() => {
                    Some(UpgradeEvent::TaskSucceeded)
                }
                TaskObservation::Present(TaskPhase::Succeeded) => {
                    Some(UpgradeEvent::TaskSucceededVersionMismatch)
                }
                TaskObservation::Present(TaskPhase::Failed) => Some(UpgradeEvent::TaskFailed),
                _ => Some(UpgradeEvent::TaskRunning),
            }
        }

        InstallationPhase::UpgradeFailureBackoff => {
            if ctx.force_upgrade {
                Some(UpgradeEvent::ForceRequested)
            } else if ctx.attempts_exhausted() {
                Some(UpgradeEvent::AttemptsExhausted)
            } else if ctx.backoff_elapsed {
                Some(UpgradeEvent::BackoffElapsed)
            } else {
                Some(UpgradeEvent::BackoffPending)
            }
        }

        InstallationPhase::UpgradeFailed => ctx
            .force_upgrade
            .then_some(UpgradeEvent::ForceRequested),

        InstallationPhase::Installed => {
            if ctx.force_upgrade {
                Some(UpgradeEvent::ForceRequested)
            } else if ctx.versions_match() {
                Some(UpgradeEvent::UpToDate)
            } else {
                Some(UpgradeEvent::NewVersionAvailable)
            }
        }

        InstallationPhase::Missing
        | InstallationPhase::Installing
        | InstallationPhase::Starting
        | InstallationPhase::StartupFailed
        | InstallationPhase::NotInstalled => None,
    }
}

// ============================================================================
// Status Mutation
// ============================================================================

/// Apply a transition's status changes to `status`.
///
/// Pure function of its inputs; the reconciler runs it against a fresh copy
/// of the status inside the status store. Effects that do not mutate status
/// leave it untouched.
pub fn apply_transition_to_status(
    transition: &UpgradeTransition,
    status: &mut InstallationStatus,
    ctx: &UpgradeTransitionContext,
    now: Timestamp,
) {
    if !transition.effect.mutates_status() {
        return;
    }
    status.installation_phase = transition.to;

    match transition.effect {
        TransitionEffect::CompleteUpgrade => {
            status.reason = StatusReason::Missing;
            status.version = Some(ctx.target_version.clone());
            status.last_upgrade_failure_time = None;
            status.upgrade_attempts = 0;
            status.force_upgrade = false;
            status.description = format!("Running version {}", ctx.target_version);
        }
        TransitionEffect::ApplyResourcesAndClearForce => {
            status.force_upgrade = false;
            status.description = format!(
                "Upgrade resources for version {} re-applied",
                ctx.target_version
            );
        }
        TransitionEffect::RequestForcedRetry => {
            status.force_upgrade = true;
            status.description = format!(
                "Upgrade task succeeded but version {} is live, expected {}",
                ctx.live_version, ctx.target_version
            );
        }
        TransitionEffect::RecordTaskFailure => {
            status.reason = StatusReason::UpgradePodFailed;
            status.last_upgrade_failure_time = Some(now.to_string());
            status.upgrade_attempts = status.upgrade_attempts.saturating_add(1);
            status.description = format!(
                "Upgrade to version {} failed (attempt {})",
                ctx.target_version, status.upgrade_attempts
            );
        }
        TransitionEffect::RetryForced => {
            status.reason = StatusReason::Missing;
            status.force_upgrade = true;
            status.description = format!("Retrying upgrade to version {}", ctx.target_version);
        }
        TransitionEffect::GiveUp => {
            status.reason = StatusReason::TooManyUpgradeAttempts;
            status.description = format!(
                "Upgrade to version {} failed {} times, set forceUpgrade to retry",
                ctx.target_version, status.upgrade_attempts
            );
        }
        TransitionEffect::StartUpgrade => {
            status.reason = StatusReason::Missing;
            status.description = format!(
                "Upgrading from version {} to {}",
                ctx.live_version, ctx.target_version
            );
        }
        TransitionEffect::None
        | TransitionEffect::ApplyResources
        | TransitionEffect::WaitForBackoff => {}
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
    use k8s_openapi::api::core::v1::PodStatus;

    fn ctx(live: &str, task: TaskObservation) -> UpgradeTransitionContext {
        UpgradeTransitionContext {
            target_version: "1.5.0".to_string(),
            live_version: live.to_string(),
            task,
            max_attempts: 5,
            ..Default::default()
        }
    }

    fn step(
        phase: InstallationPhase,
        ctx: &UpgradeTransitionContext,
    ) -> Option<UpgradeTransition> {
        let sm = UpgradeStateMachine::new();
        let event = determine_upgrade_event(phase, ctx)?;
        sm.transition(phase, event, ctx)
    }

    #[test]
    fn test_task_phase_from_pod() {
        let pod = |phase: &str| Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(TaskPhase::from_pod(&pod("Succeeded")), TaskPhase::Succeeded);
        assert_eq!(TaskPhase::from_pod(&pod("Failed")), TaskPhase::Failed);
        assert_eq!(TaskPhase::from_pod(&pod("Running")), TaskPhase::Running);
        assert_eq!(TaskPhase::from_pod(&Pod::default()), TaskPhase::Unknown);
        assert_eq!(TaskObservation::from_pod(None), TaskObservation::Absent);
    }

    #[test]
    fn test_absent_task_at_target_completes() {
        let t = step(InstallationPhase::Upgrading, &ctx("1.5.0", TaskObservation::Absent)).unwrap();
        assert_eq!(t.event, UpgradeEvent::AlreadyAtTarget);
        assert_eq!(t.to, InstallationPhase::Installed);
        assert_eq!(t.effect, TransitionEffect::CompleteUpgrade);
    }

    #[test]
    fn test_absent_task_behind_target_applies() {
        let t = step(InstallationPhase::Upgrading, &ctx("1.4.2", TaskObservation::Absent)).unwrap();
        assert_eq!(t.event, UpgradeEvent::TaskMissing);
        assert_eq!(t.to, InstallationPhase::Upgrading);
        assert_eq!(t.effect, TransitionEffect::ApplyResources);
        assert!(!t.effect.mutates_status());
    }

    #[test]
    fn test_force_wins_over_existing_task() {
        let mut c = ctx("1.4.2", TaskObservation::Present(TaskPhase::Failed));
        c.force_upgrade = true;
        let t = step(InstallationPhase::Upgrading, &c).unwrap();
        assert_eq!(t.event, UpgradeEvent::ForceRequested);
        assert_eq!(t.effect, TransitionEffect::ApplyResourcesAndClearForce);
    }

    #[test]
    fn test_force_at_target_completes() {
        let mut c = ctx("1.5.0", TaskObservation::Present(TaskPhase::Running));
        c.force_upgrade = true;
        let t = step(InstallationPhase::Upgrading, &c).unwrap();
        assert_eq!(t.event, UpgradeEvent::AlreadyAtTarget);
    }

    #[test]
    fn test_task_outcomes() {
        let t = step(
            InstallationPhase::Upgrading,
            &ctx("1.5.0", TaskObservation::Present(TaskPhase::Succeeded)),
        )
        .unwrap();
        assert_eq!(t.to, InstallationPhase::Installed);

        let t = step(
            InstallationPhase::Upgrading,
            &ctx("1.4.2", TaskObservation::Present(TaskPhase::Succeeded)),
        )
        .unwrap();
        assert_eq!(t.event, UpgradeEvent::TaskSucceededVersionMismatch);
        assert_eq!(t.to, InstallationPhase::Upgrading);

        let t = step(
            InstallationPhase::Upgrading,
            &ctx("1.4.2", TaskObservation::Present(TaskPhase::Failed)),
        )
        .unwrap();
        assert_eq!(t.to, InstallationPhase::UpgradeFailureBackoff);

        for phase in [TaskPhase::Pending, TaskPhase::Running, TaskPhase::Unknown] {
            let t = step(
                InstallationPhase::Upgrading,
                &ctx("1.4.2", TaskObservation::Present(phase)),
            )
            .unwrap();
            assert_eq!(t.event, UpgradeEvent::TaskRunning);
            assert_eq!(t.effect, TransitionEffect::None);
        }
    }

    #[test]
    fn test_backoff_priorities() {
        let mut c = ctx("1.4.2", TaskObservation::Absent);
        c.upgrade_attempts = 2;
        assert_eq!(
            step(InstallationPhase::UpgradeFailureBackoff, &c).unwrap().event,
            UpgradeEvent::BackoffPending
        );

        c.backoff_elapsed = true;
        let t = step(InstallationPhase::UpgradeFailureBackoff, &c).unwrap();
        assert_eq!(t.event, UpgradeEvent::BackoffElapsed);
        assert_eq!(t.to, InstallationPhase::Upgrading);

        c.upgrade_attempts = 5;
        let t = step(InstallationPhase::UpgradeFailureBackoff, &c).unwrap();
        assert_eq!(t.event, UpgradeEvent::AttemptsExhausted);
        assert_eq!(t.to, InstallationPhase::UpgradeFailed);

        c.force_upgrade = true;
        let t = step(InstallationPhase::UpgradeFailureBackoff, &c).unwrap();
        assert_eq!(t.event, UpgradeEvent::ForceRequested);
        assert_eq!(t.to, InstallationPhase::Upgrading);
    }

    #[test]
    fn test_upgrade_failed_waits_for_force() {
        let mut c = ctx("1.4.2", TaskObservation::Absent);
        c.upgrade_attempts = 5;
        assert!(determine_upgrade_event(InstallationPhase::UpgradeFailed, &c).is_none());

        c.force_upgrade = true;
        let t = step(InstallationPhase::UpgradeFailed, &c).unwrap();
        assert_eq!(t.to, InstallationPhase::Upgrading);
        assert_eq!(t.effect, TransitionEffect::RetryForced);
    }

    #[test]
    fn test_installed_detects_new_version() {
        let t = step(InstallationPhase::Installed, &ctx("1.4.2", TaskObservation::Absent)).unwrap();
        assert_eq!(t.event, UpgradeEvent::NewVersionAvailable);
        assert_eq!(t.to, InstallationPhase::Upgrading);

        let t = step(InstallationPhase::Installed, &ctx("1.5.0", TaskObservation::Absent)).unwrap();
        assert_eq!(t.event, UpgradeEvent::UpToDate);
        assert_eq!(t.effect, TransitionEffect::None);
    }

    #[test]
    fn test_non_lifecycle_phases_have_no_events() {
        let c = ctx("1.4.2", TaskObservation::Absent);
        for phase in [
            InstallationPhase::Missing,
            InstallationPhase::Installing,
            InstallationPhase::Starting,
            InstallationPhase::StartupFailed,
            InstallationPhase::NotInstalled,
        ] {
            assert!(determine_upgrade_event(phase, &c).is_none());
        }
    }

    #[test]
    fn test_guards_reject_inconsistent_events() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.4.2", TaskObservation::Absent);
        assert!(sm
            .transition(InstallationPhase::Upgrading, UpgradeEvent::TaskSucceeded, &c)
            .is_none());
        assert!(sm
            .transition(InstallationPhase::Upgrading, UpgradeEvent::ForceRequested, &c)
            .is_none());
        assert!(sm
            .transition(InstallationPhase::Installed, UpgradeEvent::TaskFailed, &c)
            .is_none());
    }

    #[test]
    fn test_transitions_from() {
        let sm = UpgradeStateMachine::new();
        let upgrading = sm.transitions_from(InstallationPhase::Upgrading);
        assert_eq!(upgrading.len(), 7);
        assert!(upgrading.iter().any(|t| t.to == InstallationPhase::Installed));
        assert!(sm
            .transitions_from(InstallationPhase::UpgradeFailed)
            .iter()
            .all(|t| t.to == InstallationPhase::Upgrading));
        assert!(sm.transitions_from(InstallationPhase::Missing).is_empty());
    }

    #[test]
    fn test_complete_upgrade_resets_bookkeeping() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.5.0", TaskObservation::Absent);
        let t = sm
            .transition(InstallationPhase::Upgrading, UpgradeEvent::AlreadyAtTarget, &c)
            .unwrap();
        let mut status = InstallationStatus {
            installation_phase: InstallationPhase::Upgrading,
            reason: StatusReason::UpgradePodFailed,
            version: Some("1.4.2".to_string()),
            last_upgrade_failure_time: Some("2026-01-01T00:00:00Z".to_string()),
            upgrade_attempts: 3,
            force_upgrade: true,
            ..Default::default()
        };
        apply_transition_to_status(&t, &mut status, &c, Timestamp::now());
        assert_eq!(status.installation_phase, InstallationPhase::Installed);
        assert_eq!(status.reason, StatusReason::Missing);
        assert_eq!(status.version.as_deref(), Some("1.5.0"));
        assert!(status.last_upgrade_failure_time.is_none());
        assert_eq!(status.upgrade_attempts, 0);
        assert!(!status.force_upgrade);
    }

    #[test]
    fn test_task_failure_records_attempt() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.4.2", TaskObservation::Present(TaskPhase::Failed));
        let t = sm
            .transition(InstallationPhase::Upgrading, UpgradeEvent::TaskFailed, &c)
            .unwrap();
        let now: Timestamp = "2026-03-01T10:00:00Z".parse().unwrap();
        let mut status = InstallationStatus {
            installation_phase: InstallationPhase::Upgrading,
            version: Some("1.4.2".to_string()),
            upgrade_attempts: 1,
            ..Default::default()
        };
        apply_transition_to_status(&t, &mut status, &c, now);
        assert_eq!(status.installation_phase, InstallationPhase::UpgradeFailureBackoff);
        assert_eq!(status.reason, StatusReason::UpgradePodFailed);
        assert_eq!(status.upgrade_attempts, 2);
        assert_eq!(
            status.last_upgrade_failure_time.as_deref(),
            Some("2026-03-01T10:00:00Z")
        );
        assert_eq!(status.version.as_deref(), Some("1.4.2"));
    }

    #[test]
    fn test_non_mutating_effects_leave_status_alone() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.4.2", TaskObservation::Absent);
        let t = sm
            .transition(InstallationPhase::Upgrading, UpgradeEvent::TaskMissing, &c)
            .unwrap();
        let original = InstallationStatus {
            installation_phase: InstallationPhase::Upgrading,
            upgrade_attempts: 2,
            ..Default::default()
        };
        let mut status = original.clone();
        apply_transition_to_status(&t, &mut status, &c, Timestamp::now());
        assert_eq!(status, original);
    }
}
