//! Controller module for installation-operator.
//!
//! Contains the reconciliation loop, the upgrade state machine, error
//! handling, status management and version resolution.

// Shared modules
pub mod context;
pub mod error;
pub mod status;
pub mod versions;

// Installation upgrade controller
pub mod backoff;
pub mod reconciler;
pub mod upgrade_reconciler;
pub mod upgrade_state_machine;
