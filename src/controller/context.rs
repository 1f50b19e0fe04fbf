//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! cluster access, version resolution, templates, configuration and the
//! event recorder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::{ClusterApi, KubeClusterApi, KubeVersionSource, VersionSource};
use crate::config::OperatorConfig;
use crate::controller::status::StatusStore;
use crate::controller::upgrade_state_machine::UpgradeStateMachine;
use crate::controller::versions::VersionResolver;
use crate::crd::Installation;
use crate::health::HealthState;
use crate::resources::template::Templates;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "installation-operator";

/// Shared context for the controller
pub struct Context {
    /// Cluster access
    pub cluster: Arc<dyn ClusterApi>,
    /// Sole writer of Installation status
    pub status_store: StatusStore,
    /// Target and live version resolution
    pub versions: VersionResolver,
    /// Upgrade template and descriptor
    pub templates: Arc<Templates>,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Upgrade phase transition table
    pub state_machine: UpgradeStateMachine,
    /// Kubernetes client for event publishing; `None` disables events
    client: Option<Client>,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Consecutive retryable failures per `namespace/name`
    retries: Mutex<HashMap<String, u32>>,
}

impl Context {
    /// Create a new context backed by the Kubernetes API.
    pub fn new(
        client: Client,
        config: OperatorConfig,
        templates: Arc<Templates>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let cluster = Arc::new(KubeClusterApi::new(client.clone()));
        let versions = Arc::new(KubeVersionSource::new(client.clone(), templates.clone()));
        let mut ctx = Self::with_collaborators(cluster, versions, templates, config);
        ctx.client = Some(client);
        ctx.health_state = health_state;
        ctx
    }

    /// Create a context over arbitrary collaborators, with events disabled.
    pub fn with_collaborators(
        cluster: Arc<dyn ClusterApi>,
        versions: Arc<dyn VersionSource>,
        templates: Arc<Templates>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            status_store: StatusStore::new(cluster.clone()),
            cluster,
            versions: VersionResolver::new(versions),
            templates,
            config,
            state_machine: UpgradeStateMachine::new(),
            client: None,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state: None,
            retries: Mutex::new(HashMap::new()),
        }
    }

    /// Count a retryable failure, returning the failures seen before it.
    pub fn record_retry(&self, namespace: &str, name: &str) -> u32 {
        let mut retries = self.retries.lock().unwrap_or_else(|p| p.into_inner());
        let count = retries.entry(format!("{namespace}/{name}")).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    /// Forget failures after a successful reconciliation.
    pub fn reset_retries(&self, namespace: &str, name: &str) {
        let mut retries = self.retries.lock().unwrap_or_else(|p| p.into_inner());
        retries.remove(&format!("{namespace}/{name}"));
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Option<Recorder> {
        self.client
            .as_ref()
            .map(|client| Recorder::new(client.clone(), self.reporter.clone()))
    }

    async fn publish(
        &self,
        installation: &Installation,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let Some(recorder) = self.recorder() else {
            return;
        };
        let object_ref = installation.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for an installation
    pub async fn publish_normal_event(
        &self,
        installation: &Installation,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(installation, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for an installation
    pub async fn publish_warning_event(
        &self,
        installation: &Installation,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(installation, EventType::Warning, reason, action, note)
            .await;
    }
}
