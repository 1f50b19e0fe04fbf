// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for installation-operator.
//!
//! Uses proptest to generate random upgrade situations and verify invariants
//! of the transition table and the status mutations it drives.

use std::time::Duration;

use proptest::prelude::*;

use installation_operator::controller::backoff::upgrade_backoff;
use installation_operator::controller::upgrade_state_machine::{
    TaskObservation, TaskPhase, TransitionEffect, UpgradeStateMachine, UpgradeTransitionContext,
    apply_transition_to_status, determine_upgrade_event,
};
use installation_operator::crd::{InstallationPhase, InstallationStatus};

/// Strategy for generating random phases.
fn any_phase() -> impl Strategy<Value = InstallationPhase> {
    prop_oneof![
        // Installer phases
        Just(InstallationPhase::Missing),
        Just(InstallationPhase::Installing),
        Just(InstallationPhase::Starting),
        Just(InstallationPhase::StartupFailed),
        Just(InstallationPhase::NotInstalled),
        // Upgrade lifecycle
        Just(InstallationPhase::Installed),
        Just(InstallationPhase::Upgrading),
        Just(InstallationPhase::UpgradeFailureBackoff),
        Just(InstallationPhase::UpgradeFailed),
    ]
}

/// Strategy for generating task observations.
fn any_task() -> impl Strategy<Value = TaskObservation> {
    prop_oneof![
        Just(TaskObservation::Absent),
        Just(TaskObservation::Present(TaskPhase::Pending)),
        Just(TaskObservation::Present(TaskPhase::Running)),
        Just(TaskObservation::Present(TaskPhase::Succeeded)),
        Just(TaskObservation::Present(TaskPhase::Failed)),
        Just(TaskObservation::Present(TaskPhase::Unknown)),
    ]
}

/// Strategy for generating versions from a small pool so matches happen.
fn any_version() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("1.4.2".to_string()),
        Just("1.5.0".to_string()),
        Just("2.0.0".to_string()),
    ]
}

prop_compose! {
    fn any_context()(
        target_version in any_version(),
        live_version in any_version(),
        force_upgrade in any::<bool>(),
        task in any_task(),
        upgrade_attempts in 0..8i32,
        max_attempts in 1..6i32,
        backoff_elapsed in any::<bool>(),
    ) -> UpgradeTransitionContext {
        UpgradeTransitionContext {
            target_version,
            live_version,
            force_upgrade,
            task,
            upgrade_attempts,
            max_attempts,
            backoff_elapsed,
        }
    }
}

proptest! {
    /// Property: every upgrade-lifecycle phase has an event, and the table
    /// accepts it. Installer phases never produce one.
    #[test]
    fn event_always_has_transition(phase in any_phase(), ctx in any_context()) {
        let sm = UpgradeStateMachine::new();
        match determine_upgrade_event(phase, &ctx) {
            Some(event) => {
                prop_assert!(phase.is_upgrade_lifecycle());
                let transition = sm.transition(phase, event, &ctx);
                prop_assert!(
                    transition.is_some(),
                    "no transition from {} on {}", phase, event
                );
            }
            None => prop_assert!(
                !phase.is_upgrade_lifecycle()
                    || (phase == InstallationPhase::UpgradeFailed && !ctx.force_upgrade)
            ),
        }
    }

    /// Property: transitions only lead to phases the table declares.
    #[test]
    fn transitions_stay_in_table(phase in any_phase(), ctx in any_context()) {
        let sm = UpgradeStateMachine::new();
        if let Some(event) = determine_upgrade_event(phase, &ctx) {
            if let Some(t) = sm.transition(phase, event, &ctx) {
                prop_assert!(sm.transitions_from(phase).iter().any(|x| x.to == t.to));
                prop_assert!(t.to.is_upgrade_lifecycle());
            }
        }
    }

    /// Property: Installed is only reached when the live version matches.
    #[test]
    fn installed_requires_matching_version(phase in any_phase(), ctx in any_context()) {
        let sm = UpgradeStateMachine::new();
        if let Some(event) = determine_upgrade_event(phase, &ctx) {
            if let Some(t) = sm.transition(phase, event, &ctx) {
                if t.to == InstallationPhase::Installed {
                    prop_assert_eq!(&ctx.live_version, &ctx.target_version);
                }
            }
        }
    }

    /// Property: a forced request is never silently dropped in Upgrading.
    #[test]
    fn force_in_upgrading_applies_or_completes(ctx in any_context()) {
        prop_assume!(ctx.force_upgrade);
        let sm = UpgradeStateMachine::new();
        let event = determine_upgrade_event(InstallationPhase::Upgrading, &ctx).unwrap();
        let t = sm.transition(InstallationPhase::Upgrading, event, &ctx).unwrap();
        prop_assert!(matches!(
            t.effect,
            TransitionEffect::ApplyResourcesAndClearForce | TransitionEffect::CompleteUpgrade
        ));
    }

    /// Property: applying a transition lands the status in its target phase,
    /// and completion always resets the retry bookkeeping.
    #[test]
    fn status_follows_transition(phase in any_phase(), ctx in any_context()) {
        let sm = UpgradeStateMachine::new();
        let Some(event) = determine_upgrade_event(phase, &ctx) else {
            return Ok(());
        };
        let Some(t) = sm.transition(phase, event, &ctx) else {
            return Ok(());
        };

        let mut status = InstallationStatus {
            installation_phase: phase,
            upgrade_attempts: ctx.upgrade_attempts,
            force_upgrade: ctx.force_upgrade,
            ..Default::default()
        };
        let before = status.clone();
        apply_transition_to_status(&t, &mut status, &ctx, jiff::Timestamp::UNIX_EPOCH);

        if t.effect.mutates_status() {
            prop_assert_eq!(status.installation_phase, t.to);
        } else {
            prop_assert_eq!(&status, &before);
        }
        if t.effect == TransitionEffect::CompleteUpgrade {
            prop_assert_eq!(status.upgrade_attempts, 0);
            prop_assert!(!status.force_upgrade);
            prop_assert!(status.last_upgrade_failure_time.is_none());
        }
        if t.effect == TransitionEffect::RecordTaskFailure {
            prop_assert_eq!(status.upgrade_attempts, ctx.upgrade_attempts + 1);
        }
    }

    /// Property: backoff grows with attempts and never exceeds the cap.
    #[test]
    fn backoff_is_monotonic_and_capped(attempts in 0..64i32, base in 1..120u64, max in 120..7200u64) {
        let base = Duration::from_secs(base);
        let max = Duration::from_secs(max);
        let current = upgrade_backoff(attempts, base, max);
        let next = upgrade_backoff(attempts + 1, base, max);
        prop_assert!(current <= max);
        prop_assert!(next >= current);
        prop_assert!(current >= base.min(max));
    }
}
