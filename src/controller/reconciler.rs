//! Reconciliation loop for Installation.
//!
//! Adapts the upgrade reconciler to the kube-runtime controller: one call per
//! trigger, requeue scheduling per phase, metrics, and the error policy.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, warn};

use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::upgrade_reconciler::{UpgradeOutcome, reconcile_installation};
use crate::controller::upgrade_state_machine::TransitionEffect;
use crate::crd::{Installation, InstallationPhase};

/// Reconcile an Installation
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile(obj: Arc<Installation>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    debug!(name = %name, namespace = %namespace, "Reconciling Installation");

    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "Installation is being deleted, skipping");
        ctx.reset_retries(&namespace, &name);
        return Ok(Action::await_change());
    }

    let outcome = reconcile_installation(&obj, &ctx).await?;
    ctx.reset_retries(&namespace, &name);

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        health_state.last_reconcile.store(
            jiff::Timestamp::now().as_second().unsigned_abs(),
            Ordering::Relaxed,
        );
    }

    Ok(Action::requeue(requeue_interval(&outcome)))
}

/// Delay before the next pass for an outcome.
///
/// Status commits and task changes trigger their own watch events; the
/// interval is the fallback poll.
pub fn requeue_interval(outcome: &UpgradeOutcome) -> Duration {
    if let Some(wait) = outcome.requeue_after {
        return wait;
    }
    match (outcome.phase, outcome.effect) {
        (InstallationPhase::Upgrading, TransitionEffect::None) => Duration::from_secs(15),
        (InstallationPhase::Upgrading, _) => Duration::from_secs(5),
        (InstallationPhase::UpgradeFailureBackoff, _) => Duration::from_secs(30),
        (InstallationPhase::Installed, _) => Duration::from_secs(300),
        _ => Duration::from_secs(600),
    }
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Installation>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        ctx.reset_retries(&namespace, &name);
        return Action::await_change();
    }

    if error.is_retryable() {
        let retry_count = ctx.record_retry(&namespace, &name);
        let backoff = error.requeue_after_with_retry_count(retry_count);

        warn!(
            name = %name,
            error = %error,
            retry_count = retry_count,
            backoff_secs = backoff.as_secs(),
            "Retryable error, will retry with exponential backoff"
        );

        Action::requeue(backoff)
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(error.requeue_after())
    }
}
