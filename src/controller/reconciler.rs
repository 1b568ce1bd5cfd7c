//! Node lifecycle reconciliation
//!
//! One pass looks at one Node: healthy nodes are left alone, suspect nodes are
//! checked against the cloud provider, and nodes whose instance is gone or shut
//! down have their record removed. Nothing is remembered between passes; the
//! kube-rs controller provides redelivery and the requeue backoff.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::RequeueTracker;
use super::events::{EventSink, DELETE_NODE_REASON, EVENT_TYPE_NORMAL, PUBLISH_TIMEOUT};
use super::metrics;
use super::status::{classify_instance, InstanceStatus};
use super::store::{Deletion, NodeStore};
use crate::cloud::{resolve_provider_id, CloudInstances, NotFoundTolerance, ProviderContext};
use crate::error::{Error, Result};
use crate::node::ready_status;

/// Terminal action of one reconciliation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Node is healthy or already gone
    Ignored,
    /// Node record was removed
    Deleted,
    /// Node would have been removed, but dry-run is active
    DryRunSkipped,
    /// Cloud status has not settled; check again later
    Requeued,
    /// Delete request did not remove the record; carries the cause
    Failed(String),
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Ignored => "Ignored",
            ReconcileOutcome::Deleted => "Deleted",
            ReconcileOutcome::DryRunSkipped => "DryRunSkipped",
            ReconcileOutcome::Requeued => "Requeued",
            ReconcileOutcome::Failed(_) => "Failed",
        }
    }
}

/// Settings fixed at startup
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub provider: ProviderContext,
    pub tolerance: NotFoundTolerance,
    /// Log and emit events, but never delete
    pub dry_run: bool,
}

/// Decides and executes the action for a single node
pub struct Reconciler {
    config: ReconcilerConfig,
    store: Arc<dyn NodeStore>,
    events: Arc<dyn EventSink>,
    instances: Arc<dyn CloudInstances>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn NodeStore>,
        events: Arc<dyn EventSink>,
        instances: Arc<dyn CloudInstances>,
    ) -> Self {
        Self {
            config,
            store,
            events,
            instances,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one reconciliation pass for the node called `name`
    ///
    /// Returns `Err` only for problems the pass cannot work around: a failed
    /// read of the node, or a node without a Ready condition.
    #[instrument(skip(self))]
    pub async fn reconcile_node(&self, name: &str) -> Result<ReconcileOutcome> {
        let node = match self.store.get_node(name).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                // Deleted after the reconcile request was queued
                debug!("Node deleted while performing reconciliation step");
                return Ok(ReconcileOutcome::Ignored);
            }
            Err(e) => {
                error!("Error fetching Node {}: {}", name, e);
                return Err(e);
            }
        };

        let ready = ready_status(&node).inspect_err(|e| error!("{}", e))?;
        debug!("Node {} ready status: {}", name, ready);

        if !ready.is_suspect() {
            debug!("Node {} is up according to APIServer, ignoring", name);
            return Ok(ReconcileOutcome::Ignored);
        }

        info!(
            "Node {} appears down according to APIServer (Ready={}), investigating",
            name, ready
        );

        let status = self.instance_status(&node).await;
        if !status.is_terminal() {
            // The kubelet usually stops reporting before the provider finishes
            // shutting the instance down.
            info!(
                "Requeuing node {} to let cloud status settle (node may be shutting down)",
                name
            );
            return Ok(ReconcileOutcome::Requeued);
        }

        info!("Node {} matches unhealthy criteria: node status is {}", name, status);
        Ok(self.delete_node(&node, status).await)
    }

    /// Instance status for this pass; every failure collapses to `Unknown`
    async fn instance_status(&self, node: &Node) -> InstanceStatus {
        let name = node.name_any();

        let provider_id = match resolve_provider_id(node, &self.config.provider) {
            Ok(id) => id,
            Err(e) => {
                warn!("Unable to determine provider id for node {}: {}", name, e);
                return InstanceStatus::Unknown;
            }
        };

        match classify_instance(&*self.instances, &self.config.tolerance, &provider_id).await {
            Ok(status) => {
                debug!("Instance {} for node {} is {}", provider_id, name, status);
                status
            }
            Err(e) => {
                warn!("Unable to get node status for {} ({}): {}", name, provider_id, e);
                InstanceStatus::Unknown
            }
        }
    }

    async fn delete_node(&self, node: &Node, status: InstanceStatus) -> ReconcileOutcome {
        let name = node.name_any();
        let message = format!("Deleting node {} because node status is {}", name, status);
        info!("{}", message);

        let publish = self
            .events
            .publish(node, EVENT_TYPE_NORMAL, DELETE_NODE_REASON, &message);
        match timeout(PUBLISH_TIMEOUT, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to record {} event for node {}: {}", DELETE_NODE_REASON, name, e)
            }
            Err(_) => warn!(
                "Timed out recording {} event for node {} after {:?}",
                DELETE_NODE_REASON, name, PUBLISH_TIMEOUT
            ),
        }

        if self.config.dry_run {
            info!("Dry run: skipping deletion of node {}", name);
            metrics::record_deletion(status.as_str(), true);
            return ReconcileOutcome::DryRunSkipped;
        }

        match self.store.delete_node(&name).await {
            Ok(Deletion::Deleted) => {
                info!("Deleted node {}", name);
                metrics::record_deletion(status.as_str(), false);
                ReconcileOutcome::Deleted
            }
            Ok(Deletion::AlreadyGone(cause)) => {
                // Not an error, but this pass did not remove the record
                info!("Node {} was already deleted: {}", name, cause);
                ReconcileOutcome::Failed(cause)
            }
            Err(e) => {
                error!("Unable to delete node {}: {}", name, e);
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Shared state for the controller
pub struct ControllerState {
    pub reconciler: Reconciler,
    pub requeues: RequeueTracker,
}

/// Main entry point to start the controller
pub async fn run_controller(client: Client, state: Arc<ControllerState>) -> Result<()> {
    let nodes: Api<Node> = Api::all(client);

    let config = state.reconciler.config();
    info!(
        "Starting Node lifecycle controller (cloud: {}, dry run: {})",
        config.provider.family(),
        config.dry_run
    );

    // Fail fast when RBAC does not allow reading nodes
    if let Err(e) = nodes.list(&ListParams::default().limit(1)).await {
        error!("Unable to list Nodes: {:?}", e);
        return Err(Error::ConfigError(format!("cannot list nodes: {}", e)));
    }

    Controller::new(nodes, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled: {}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("Node lifecycle controller stopped");
    Ok(())
}

/// The reconciliation function handed to kube-rs
#[instrument(skip(node, ctx), fields(node = %node.name_any()))]
async fn reconcile(node: Arc<Node>, ctx: Arc<ControllerState>) -> Result<Action> {
    let name = node.name_any();
    let outcome = ctx.reconciler.reconcile_node(&name).await?;
    metrics::record_outcome(outcome.as_str());
    Ok(action_for(&ctx.requeues, &name, &outcome))
}

/// Map a pass outcome to the scheduler action
///
/// Unsettled and failed passes come back with growing delays; anything else
/// waits for the next change to the node.
pub fn action_for(requeues: &RequeueTracker, name: &str, outcome: &ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Requeued | ReconcileOutcome::Failed(_) => {
            let delay = requeues.next_delay(name);
            debug!("Requeuing node {} in {:?}", name, delay);
            Action::requeue(delay)
        }
        ReconcileOutcome::Ignored | ReconcileOutcome::Deleted | ReconcileOutcome::DryRunSkipped => {
            requeues.reset(name);
            Action::await_change()
        }
    }
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(node: Arc<Node>, error: &Error, ctx: Arc<ControllerState>) -> Action {
    let name = node.name_any();
    error!(
        "Reconciliation error for node {} (retriable: {}): {}",
        name,
        error.is_retriable(),
        error
    );
    metrics::record_outcome("Error");
    Action::requeue(ctx.requeues.next_delay(&name))
}
