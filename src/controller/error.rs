//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Base requeue delay for retryable errors.
const RETRY_BASE_SECS: u64 = 5;

/// Upper bound for the retry requeue delay.
const RETRY_MAX_SECS: u64 = 300;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML manifest could not be decoded
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Upgrade template could not be rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Target or live version could not be determined
    #[error("Version unresolved: {0}")]
    VersionUnresolved(String),

    /// Rendered upgrade resources contain no task manifest
    #[error("Upgrade task not found in rendered resources")]
    TaskNotFound,

    /// Rendered manifest is malformed
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// Cluster rejected a manifest
    #[error("Failed to apply {kind} '{name}': {message}")]
    Apply {
        kind: String,
        name: String,
        message: String,
    },

    /// Optimistic concurrency conflict on status commit
    #[error("Conflict updating status of '{0}'")]
    Conflict(String),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
            || matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Render and locate failures point at a defect in the bundled template
    /// rather than at cluster state.
    pub fn is_template_defect(&self) -> bool {
        matches!(
            self,
            Error::Template(_) | Error::TaskNotFound | Error::Manifest(_) | Error::Yaml(_)
        )
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, conflicts and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_)
            | Error::Conflict(_)
            | Error::Apply { .. }
            | Error::VersionUnresolved(_) => true,
            Error::Template(_)
            | Error::TaskNotFound
            | Error::Manifest(_)
            | Error::Yaml(_)
            | Error::Validation(_)
            | Error::Permanent(_)
            | Error::MissingField(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        self.requeue_after_with_retry_count(0)
    }

    /// Requeue duration with exponential backoff on the retry count.
    pub fn requeue_after_with_retry_count(&self, retry_count: u32) -> Duration {
        if self.is_retryable() {
            let factor = 1u64.checked_shl(retry_count.min(16)).unwrap_or(u64::MAX);
            Duration::from_secs(RETRY_BASE_SECS.saturating_mul(factor).min(RETRY_MAX_SECS))
        } else {
            // Non-retryable errors wait for a spec change or an hourly resync
            Duration::from_secs(3600)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
