//! Node record helpers
//!
//! The controller works on the built-in `core/v1 Node`; this module holds the
//! small amount of interpretation it needs on top of the k8s-openapi types.

mod ready;

pub use ready::{ready_condition, ready_status, ReadyStatus, NODE_READY};

#[cfg(test)]
pub(crate) mod fixtures;
