//! installation-operator library crate
//!
//! This module exports the controller, CRD definitions, Kubernetes access
//! traits and the upgrade resource pipeline.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{context::Context, error::Error, reconciler::reconcile};
use crd::Installation;
use resources::common::MANAGED_BY;
use resources::template::Templates;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream for a resource type.
///
/// The stream keeps an in-memory cache, retries with exponential backoff on
/// errors and yields applied objects. Status-only updates are not filtered:
/// an administrator setting `forceUpgrade` must trigger a reconciliation.
///
/// Returns the reflector store (for cache lookups) and the stream.
fn create_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects();
    (reader, stream)
}

/// Run the Installation controller.
///
/// Watches Installations in `config.watch_namespace` (cluster-wide when
/// unset) together with the upgrade task pods they own, and reconciles them
/// until the watch streams end.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) -> Result<(), Error> {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    info!(scope = %scope_msg, "Starting controller for Installation resources");

    let templates = Arc::new(Templates::load(config.template_dir.as_deref())?);
    info!(
        app = %templates.descriptor().name,
        version = %templates.descriptor().version,
        "Loaded upgrade templates"
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), config, templates, health_state));

    let installations: Api<Installation> = scoped_api(client.clone(), namespace.as_deref());
    let pods: Api<Pod> = scoped_api(client, namespace.as_deref());

    let watcher_config = default_watcher_config();
    let (reader, installation_stream) = create_stream(installations, watcher_config.clone());

    // Only pod metadata is needed: any change to an owned upgrade task
    // (including its phase) bumps resourceVersion and maps back to the owner.
    let pod_config = watcher_config.labels(&format!("app.kubernetes.io/managed-by={MANAGED_BY}"));

    Controller::for_stream(installation_stream, reader)
        .owns_stream(metadata_watcher(pods, pod_config).touched_objects())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // NotFound is expected when watch events for owned pods
                    // arrive after the Installation was deleted.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
    Ok(())
}
