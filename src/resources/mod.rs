//! Upgrade resources.
//!
//! ## Pipeline
//!
//! | Step | Module |
//! |------|--------|
//! | Render the upgrade template into YAML documents | `template` |
//! | Parse documents into tagged manifests, locate the task | `manifest` |
//! | Stamp namespace and owner, create or replace | `applier` |

pub mod applier;
pub mod common;
pub mod manifest;
pub mod template;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
