//! Operator configuration.
//!
//! All settings come from environment variables set on the operator
//! Deployment. Unset variables fall back to defaults; malformed values are
//! rejected at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::controller::error::Error;

/// Default service account the upgrade task runs as
pub const DEFAULT_TASK_SERVICE_ACCOUNT: &str = "installation-operator";

/// Default port for the health and metrics server
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Namespace holding the leader election lease when `POD_NAMESPACE` is unset
pub const DEFAULT_POD_NAMESPACE: &str = "default";

const DEFAULT_BACKOFF_BASE_SECS: u64 = 60;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 3600;
const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Runtime configuration for the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches cluster-wide.
    pub watch_namespace: Option<String>,
    /// Directory holding template overrides; `None` uses the bundled templates.
    pub template_dir: Option<PathBuf>,
    /// Backoff after the first failed upgrade attempt.
    pub upgrade_backoff_base: Duration,
    /// Upper bound for the upgrade backoff.
    pub upgrade_backoff_max: Duration,
    /// Failed attempts after which the upgrade is given up.
    pub upgrade_max_attempts: i32,
    /// Service account assigned to the upgrade task.
    pub task_service_account: String,
    /// Port of the health and metrics server.
    pub health_port: u16,
    /// Name of the operator pod, used as the lease holder.
    pub pod_name: Option<String>,
    /// Namespace the operator runs in and keeps its lease in.
    pub pod_namespace: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            template_dir: None,
            upgrade_backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            upgrade_backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            upgrade_max_attempts: DEFAULT_MAX_ATTEMPTS,
            task_service_account: DEFAULT_TASK_SERVICE_ACCOUNT.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            pod_name: None,
            pod_namespace: DEFAULT_POD_NAMESPACE.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backoff_base = match non_empty("UPGRADE_BACKOFF_BASE_SECS") {
            Some(v) => Duration::from_secs(parse_number("UPGRADE_BACKOFF_BASE_SECS", &v)?),
            None => defaults.upgrade_backoff_base,
        };
        let backoff_max = match non_empty("UPGRADE_BACKOFF_MAX_SECS") {
            Some(v) => Duration::from_secs(parse_number("UPGRADE_BACKOFF_MAX_SECS", &v)?),
            None => defaults.upgrade_backoff_max,
        };
        if backoff_max < backoff_base {
            return Err(Error::Validation(format!(
                "UPGRADE_BACKOFF_MAX_SECS ({}) must not be lower than UPGRADE_BACKOFF_BASE_SECS ({})",
                backoff_max.as_secs(),
                backoff_base.as_secs()
            )));
        }

        let max_attempts = match non_empty("UPGRADE_MAX_ATTEMPTS") {
            Some(v) => parse_number::<i32>("UPGRADE_MAX_ATTEMPTS", &v)?,
            None => defaults.upgrade_max_attempts,
        };
        if max_attempts < 1 {
            return Err(Error::Validation(
                "UPGRADE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let health_port = match non_empty("HEALTH_PORT") {
            Some(v) => parse_number("HEALTH_PORT", &v)?,
            None => defaults.health_port,
        };

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            template_dir: non_empty("TEMPLATE_DIR").map(PathBuf::from),
            upgrade_backoff_base: backoff_base,
            upgrade_backoff_max: backoff_max,
            upgrade_max_attempts: max_attempts,
            task_service_account: non_empty("UPGRADE_TASK_SERVICE_ACCOUNT")
                .unwrap_or(defaults.task_service_account),
            health_port,
            pod_name: non_empty("POD_NAME"),
            pod_namespace: non_empty("POD_NAMESPACE").unwrap_or(defaults.pod_namespace),
        })
    }

    /// Identity this replica competes for leadership with: the pod name, or
    /// the hostname outside a pod.
    pub fn holder_id(&self) -> String {
        self.pod_name.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("{key} must be a number, got '{value}'")))
}
