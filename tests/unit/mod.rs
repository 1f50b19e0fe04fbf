//! Unit tests for installation-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation through the public API.

mod crd_tests {
    use installation_operator::crd::{
        Condition, Installation, InstallationPhase, InstallationSpec, InstallationStatus,
        StatusReason,
    };

    #[test]
    fn test_phase_display() {
        assert_eq!(InstallationPhase::Missing.to_string(), "Missing");
        assert_eq!(InstallationPhase::Installed.to_string(), "Installed");
        assert_eq!(InstallationPhase::Upgrading.to_string(), "Upgrading");
        assert_eq!(
            InstallationPhase::UpgradeFailureBackoff.to_string(),
            "UpgradeFailureBackoff"
        );
        assert_eq!(InstallationPhase::UpgradeFailed.to_string(), "UpgradeFailed");
    }

    #[test]
    fn test_crd_group_and_names() {
        use kube::CustomResourceExt;

        let crd = Installation::crd();
        assert_eq!(crd.spec.group, "installation-operator.dev");
        assert_eq!(crd.spec.names.kind, "Installation");
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("installations.installation-operator.dev")
        );
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(InstallationPhase::default(), InstallationPhase::Missing);
        assert_eq!(StatusReason::default(), StatusReason::Missing);
    }

    #[test]
    fn test_upgrade_lifecycle_phases() {
        let lifecycle: Vec<_> = InstallationPhase::all()
            .into_iter()
            .filter(InstallationPhase::is_upgrade_lifecycle)
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                InstallationPhase::Installed,
                InstallationPhase::Upgrading,
                InstallationPhase::UpgradeFailureBackoff,
                InstallationPhase::UpgradeFailed,
            ]
        );
    }

    #[test]
    fn test_status_wire_format() {
        let status = InstallationStatus {
            installation_phase: InstallationPhase::UpgradeFailureBackoff,
            reason: StatusReason::UpgradePodFailed,
            upgrade_attempts: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["installationPhase"], "UpgradeFailureBackoff");
        assert_eq!(json["reason"], "UpgradePodFailed");
        assert_eq!(json["upgradeAttempts"], 2);
        assert_eq!(json["forceUpgrade"], false);
    }

    #[test]
    fn test_status_parses_admin_force_request() {
        let status: InstallationStatus = serde_json::from_value(serde_json::json!({
            "installationPhase": "UpgradeFailed",
            "reason": "TooManyUpgradeAttempts",
            "upgradeAttempts": 5,
            "forceUpgrade": true
        }))
        .unwrap();
        assert_eq!(status.installation_phase, InstallationPhase::UpgradeFailed);
        assert!(status.force_upgrade);
        assert_eq!(status.upgrade_attempts, 5);
    }

    #[test]
    fn test_installation_new_has_no_status() {
        let inst = Installation::new("app", InstallationSpec::default());
        assert!(inst.status.is_none());
        assert!(inst.spec.features.is_empty());
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "Installed", "Running version 1.5.0", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "Installed");
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_condition_degraded() {
        let condition = Condition::degraded(true, "UpgradePodFailed", "attempt 1", Some(3));
        assert_eq!(condition.r#type, "Degraded");
        assert_eq!(condition.status, "True");
    }
}

mod state_machine_tests {
    use installation_operator::controller::upgrade_state_machine::{
        TaskObservation, TaskPhase, TransitionEffect, UpgradeEvent, UpgradeStateMachine,
        UpgradeTransitionContext, determine_upgrade_event,
    };
    use installation_operator::crd::InstallationPhase;

    fn ctx(live: &str, task: TaskObservation) -> UpgradeTransitionContext {
        UpgradeTransitionContext {
            target_version: "1.5.0".to_string(),
            live_version: live.to_string(),
            task,
            max_attempts: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_upgrading_can_reach_installed_and_backoff() {
        let sm = UpgradeStateMachine::new();
        let targets: Vec<_> = sm
            .transitions_from(InstallationPhase::Upgrading)
            .iter()
            .map(|t| t.to)
            .collect();
        assert!(targets.contains(&InstallationPhase::Installed));
        assert!(targets.contains(&InstallationPhase::UpgradeFailureBackoff));
        assert!(!targets.contains(&InstallationPhase::UpgradeFailed));
    }

    #[test]
    fn test_upgrade_failed_only_leaves_to_upgrading() {
        let sm = UpgradeStateMachine::new();
        let targets: Vec<_> = sm
            .transitions_from(InstallationPhase::UpgradeFailed)
            .iter()
            .map(|t| t.to)
            .collect();
        assert_eq!(targets, vec![InstallationPhase::Upgrading]);
    }

    #[test]
    fn test_installer_phases_have_no_transitions() {
        let sm = UpgradeStateMachine::new();
        for phase in InstallationPhase::all() {
            if !phase.is_upgrade_lifecycle() {
                assert!(sm.transitions_from(phase).is_empty(), "{phase}");
            }
        }
    }

    #[test]
    fn test_running_task_is_a_no_op() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.4.2", TaskObservation::Present(TaskPhase::Running));
        let event = determine_upgrade_event(InstallationPhase::Upgrading, &c).unwrap();
        assert_eq!(event, UpgradeEvent::TaskRunning);
        let t = sm.transition(InstallationPhase::Upgrading, event, &c).unwrap();
        assert_eq!(t.to, InstallationPhase::Upgrading);
        assert_eq!(t.effect, TransitionEffect::None);
    }

    #[test]
    fn test_succeeded_task_with_stale_version_requests_force() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.4.2", TaskObservation::Present(TaskPhase::Succeeded));
        let event = determine_upgrade_event(InstallationPhase::Upgrading, &c).unwrap();
        assert_eq!(event, UpgradeEvent::TaskSucceededVersionMismatch);
        let t = sm.transition(InstallationPhase::Upgrading, event, &c).unwrap();
        assert_eq!(t.effect, TransitionEffect::RequestForcedRetry);
        assert_eq!(t.to, InstallationPhase::Upgrading);
    }

    #[test]
    fn test_guard_rejects_completion_on_version_mismatch() {
        let sm = UpgradeStateMachine::new();
        let c = ctx("1.4.2", TaskObservation::Present(TaskPhase::Succeeded));
        assert!(
            sm.transition(InstallationPhase::Upgrading, UpgradeEvent::TaskSucceeded, &c)
                .is_none()
        );
    }
}

mod config_tests {
    use std::time::Duration;

    use installation_operator::OperatorConfig;
    use installation_operator::config::DEFAULT_TASK_SERVICE_ACCOUNT;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.upgrade_backoff_base, Duration::from_secs(60));
        assert_eq!(config.upgrade_backoff_max, Duration::from_secs(3600));
        assert_eq!(config.upgrade_max_attempts, 5);
        assert_eq!(config.task_service_account, DEFAULT_TASK_SERVICE_ACCOUNT);
        assert_eq!(config.health_port, 8080);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = OperatorConfig::from_lookup(|key| {
            (key == "UPGRADE_MAX_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }
}

mod error_tests {
    use std::time::Duration;

    use installation_operator::controller::error::Error;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Transient("pod terminating".into()).is_retryable());
        assert!(Error::Conflict("app".into()).is_retryable());
        assert!(Error::VersionUnresolved("no config map".into()).is_retryable());
    }

    #[test]
    fn test_template_defects_are_not_retryable() {
        let err = Error::TaskNotFound;
        assert!(err.is_template_defect());
        assert!(!err.is_retryable());
        assert_eq!(err.requeue_after(), Duration::from_secs(3600));
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let err = Error::Transient("x".into());
        assert!(err.requeue_after_with_retry_count(1) < err.requeue_after_with_retry_count(3));
        assert_eq!(
            err.requeue_after_with_retry_count(30),
            Duration::from_secs(300)
        );
    }
}
