//! Status management.
//!
//! Condition helpers plus the [`StatusStore`], the only writer of
//! Installation status. Every commit reads a fresh copy, checks it is still
//! the state the caller decided from, mutates it and submits it guarded by
//! the copy's resourceVersion.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use crate::client::ClusterApi;
use crate::controller::error::{Error, Result};
use crate::crd::{Condition, Installation, InstallationPhase, InstallationStatus};

/// Commit attempts before a conflict is surfaced to the controller.
pub const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from existing conditions so unchanged ones keep their
    /// transition time.
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, mut condition: Condition) -> &mut Self {
        // Find and replace existing condition of same type
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Set Progressing condition
    pub fn progressing(
        &mut self,
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::progressing(
            progressing,
            reason,
            message,
            generation,
        ))
    }

    /// Set Degraded condition
    pub fn degraded(
        &mut self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Ready / Progressing / Degraded conditions derived from a status.
pub fn installation_conditions(
    status: &InstallationStatus,
    generation: Option<i64>,
) -> Vec<Condition> {
    let phase = status.installation_phase;
    let reason = phase.to_string();
    let message = if status.description.is_empty() {
        reason.clone()
    } else {
        status.description.clone()
    };

    let (ready, progressing, degraded) = match phase {
        InstallationPhase::Installed => (true, false, false),
        InstallationPhase::Installing
        | InstallationPhase::Starting
        | InstallationPhase::Upgrading => (false, true, false),
        InstallationPhase::UpgradeFailureBackoff => (false, true, true),
        InstallationPhase::StartupFailed
        | InstallationPhase::NotInstalled
        | InstallationPhase::UpgradeFailed => (false, false, true),
        InstallationPhase::Missing => (false, false, false),
    };

    let degraded_reason = if degraded {
        status.reason.to_string()
    } else {
        reason.clone()
    };

    let mut builder = ConditionBuilder::from_existing(&status.conditions);
    builder
        .ready(ready, &reason, &message, generation)
        .progressing(progressing, &reason, &message, generation)
        .degraded(degraded, &degraded_reason, &message, generation);
    builder.build()
}

/// Writes Installation status with optimistic concurrency.
#[derive(Clone)]
pub struct StatusStore {
    cluster: Arc<dyn ClusterApi>,
}

impl StatusStore {
    /// Create a status store writing through `cluster`.
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Read the stored copy of an installation.
    pub async fn read_fresh(&self, installation: &Installation) -> Result<Installation> {
        let namespace = installation
            .namespace()
            .ok_or_else(|| Error::MissingField("Installation.metadata.namespace".to_string()))?;
        self.cluster
            .get_installation(&namespace, &installation.name_any())
            .await
    }

    /// Apply `mutate` to a fresh copy of the installation's status and
    /// submit it.
    ///
    /// `still_applies` is checked against every fresh copy before mutating;
    /// when it fails the stored status has moved on from what the caller
    /// observed and nothing is written (`Ok(None)`).
    ///
    /// On a conflict the whole read-check-mutate-submit cycle is repeated,
    /// up to [`MAX_COMMIT_ATTEMPTS`] times, before [`Error::Conflict`] is
    /// returned. The in-memory `installation` is never modified.
    pub async fn commit<G, F>(
        &self,
        installation: &Installation,
        still_applies: G,
        mutate: F,
    ) -> Result<Option<Installation>>
    where
        G: Fn(&InstallationStatus) -> bool + Send + Sync,
        F: Fn(&mut InstallationStatus) + Send + Sync,
    {
        let name = installation.name_any();

        let mut attempt = 1;
        loop {
            let fresh = self.read_fresh(installation).await?;
            let mut status = fresh.status.clone().unwrap_or_default();
            if !still_applies(&status) {
                debug!(
                    name = %name,
                    phase = %status.installation_phase,
                    "Stored status moved on since it was observed, skipping commit"
                );
                return Ok(None);
            }

            let generation = fresh.metadata.generation;
            mutate(&mut status);
            status.observed_generation = generation;
            status.conditions = installation_conditions(&status, generation);
            let mut updated = fresh;
            updated.status = Some(status);

            match self.cluster.update_status(&updated).await {
                Ok(committed) => return Ok(Some(committed)),
                Err(e) if e.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => {
                    debug!(
                        name = %name,
                        attempt,
                        "Status commit conflicted, retrying with a fresh copy"
                    );
                    attempt += 1;
                }
                Err(e) if e.is_conflict() => return Err(Error::Conflict(name)),
                Err(e) => return Err(e),
            }
        }
    }
}
