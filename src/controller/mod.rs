//! Controller module for Node lifecycle reconciliation
//!
//! This module contains the controller loop, the per-node decision logic,
//! instance status classification and the cluster-facing adapters.

mod backoff;
mod events;
pub mod metrics;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod status;
mod store;

pub use backoff::{calculate_backoff, RequeueTracker};
pub use events::{
    node_event, EventSink, KubeEventSink, DELETE_NODE_REASON, EVENT_TYPE_NORMAL, PUBLISH_TIMEOUT,
};
pub use reconciler::{
    action_for, run_controller, ControllerState, ReconcileOutcome, Reconciler, ReconcilerConfig,
};
pub use status::{classify_instance, InstanceStatus};
pub use store::{Deletion, KubeNodeStore, NodeStore};
