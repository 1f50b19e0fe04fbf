//! Custom Resource Definitions (CRDs) for installation-operator.
//!
//! - `Installation`: desired deployment of the managed application and its
//!   install/upgrade status

mod installation;

pub use installation::*;
