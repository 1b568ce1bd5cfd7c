//! Reconciliation pass tests against mocked cluster and cloud access

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::Action;

use super::backoff::RequeueTracker;
use super::events::{EventSink, MockEventSink, DELETE_NODE_REASON};
use super::reconciler::{action_for, ReconcileOutcome, Reconciler, ReconcilerConfig};
use super::store::{Deletion, MockNodeStore};
use crate::cloud::{
    AwsConfig, CloudError, MockCloudInstances, NotFoundTolerance, ProviderContext, ProviderFamily,
};
use crate::error::{Error, Result};
use crate::node::fixtures::node_with_ready;
use crate::node::ReadyStatus;

const NODE: &str = "k8s-controllers-i-042988b09f6a493cc";
const PROVIDER_ID: &str = "aws:///i-042988b09f6a493cc";

fn reconciler(
    store: MockNodeStore,
    events: MockEventSink,
    cloud: MockCloudInstances,
    dry_run: bool,
) -> Reconciler {
    Reconciler::new(
        ReconcilerConfig {
            provider: ProviderContext::Aws(AwsConfig::default()),
            tolerance: NotFoundTolerance::for_family(ProviderFamily::Aws),
            dry_run,
        },
        Arc::new(store),
        Arc::new(events),
        Arc::new(cloud),
    )
}

fn store_returning(ready: Option<ReadyStatus>, provider_id: Option<&'static str>) -> MockNodeStore {
    let node = node_with_ready(NODE, ready, provider_id);
    let mut store = MockNodeStore::new();
    store
        .expect_get_node()
        .withf(|name| name == NODE)
        .times(1)
        .returning(move |_| Ok(Some(node.clone())));
    store
}

fn cloud_reporting(exists: bool, shutdown: bool) -> MockCloudInstances {
    let mut cloud = MockCloudInstances::new();
    cloud
        .expect_instance_exists()
        .withf(|id| id == PROVIDER_ID)
        .returning(move |_| Ok(exists));
    cloud
        .expect_instance_shutdown()
        .withf(|id| id == PROVIDER_ID)
        .returning(move |_| Ok(shutdown));
    cloud
}

fn silent_cloud() -> MockCloudInstances {
    let mut cloud = MockCloudInstances::new();
    cloud.expect_instance_exists().never();
    cloud.expect_instance_shutdown().never();
    cloud
}

fn no_events() -> MockEventSink {
    let mut events = MockEventSink::new();
    events.expect_publish().never();
    events
}

fn one_delete_event(status: &'static str) -> MockEventSink {
    let mut events = MockEventSink::new();
    events
        .expect_publish()
        .withf(move |node, event_type, reason, message| {
            node.metadata.name.as_deref() == Some(NODE)
                && event_type == "Normal"
                && reason == DELETE_NODE_REASON
                && message == format!("Deleting node {} because node status is {}", NODE, status)
        })
        .times(1)
        .returning(|_, _, _, _| Ok(()));
    events
}

#[tokio::test]
async fn test_ready_node_is_ignored() {
    let mut store = store_returning(Some(ReadyStatus::True), None);
    store.expect_delete_node().never();

    let outcome = reconciler(store, no_events(), silent_cloud(), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);
}

#[tokio::test]
async fn test_missing_node_is_ignored() {
    let mut store = MockNodeStore::new();
    store.expect_get_node().times(1).returning(|_| Ok(None));
    store.expect_delete_node().never();

    let outcome = reconciler(store, no_events(), silent_cloud(), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);
}

#[tokio::test]
async fn test_store_read_error_is_fatal() {
    let mut store = MockNodeStore::new();
    store.expect_get_node().returning(|_| {
        Err(Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "etcdserver: request timed out".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        })))
    });
    store.expect_delete_node().never();

    let result = reconciler(store, no_events(), silent_cloud(), false)
        .reconcile_node(NODE)
        .await;
    assert!(matches!(result, Err(Error::KubeError(_))));
}

#[tokio::test]
async fn test_missing_ready_condition_is_fatal() {
    let mut store = store_returning(None, None);
    store.expect_delete_node().never();

    let result = reconciler(store, no_events(), silent_cloud(), false)
        .reconcile_node(NODE)
        .await;
    assert!(matches!(result, Err(Error::ReadyConditionMissing(name)) if name == NODE));
}

#[tokio::test]
async fn test_unknown_ready_and_unknown_instance_requeues() {
    let mut store = store_returning(Some(ReadyStatus::Unknown), None);
    store.expect_delete_node().never();

    let outcome = reconciler(store, no_events(), cloud_reporting(true, false), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeued);
}

#[tokio::test]
async fn test_not_ready_and_not_found_deletes_once() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store
        .expect_delete_node()
        .withf(|name| name == NODE)
        .times(1)
        .returning(|_| Ok(Deletion::Deleted));

    let mut cloud = MockCloudInstances::new();
    cloud.expect_instance_exists().times(1).returning(|_| Ok(false));
    cloud.expect_instance_shutdown().never();

    let outcome = reconciler(store, one_delete_event("NotFound"), cloud, false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted);
}

#[tokio::test]
async fn test_dry_run_emits_event_without_deleting() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store.expect_delete_node().never();

    let outcome = reconciler(store, one_delete_event("NotFound"), cloud_reporting(false, false), true)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::DryRunSkipped);
}

#[tokio::test]
async fn test_shutdown_instance_is_deleted() {
    let mut store = store_returning(Some(ReadyStatus::Unknown), Some(PROVIDER_ID));
    store
        .expect_delete_node()
        .times(1)
        .returning(|_| Ok(Deletion::Deleted));

    let outcome = reconciler(store, one_delete_event("Shutdown"), cloud_reporting(true, true), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted);
}

#[tokio::test]
async fn test_recorded_provider_id_is_used() {
    let node = node_with_ready("ip-10-0-0-1.ec2.internal", Some(ReadyStatus::False), Some("aws:///us-east-1a/i-0abc"));
    let mut store = MockNodeStore::new();
    store
        .expect_get_node()
        .returning(move |_| Ok(Some(node.clone())));
    store.expect_delete_node().never();

    let mut cloud = MockCloudInstances::new();
    cloud
        .expect_instance_exists()
        .withf(|id| id == "aws:///us-east-1a/i-0abc")
        .times(1)
        .returning(|_| Ok(true));
    cloud
        .expect_instance_shutdown()
        .times(1)
        .returning(|_| Ok(false));

    let outcome = reconciler(store, no_events(), cloud, false)
        .reconcile_node("ip-10-0-0-1.ec2.internal")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeued);
}

#[tokio::test]
async fn test_unresolvable_provider_id_requeues() {
    let node = node_with_ready("ip-10-0-0-1.ec2.internal", Some(ReadyStatus::False), None);
    let mut store = MockNodeStore::new();
    store
        .expect_get_node()
        .returning(move |_| Ok(Some(node.clone())));
    store.expect_delete_node().never();

    let outcome = reconciler(store, no_events(), silent_cloud(), false)
        .reconcile_node("ip-10-0-0-1.ec2.internal")
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeued);
}

#[tokio::test]
async fn test_cloud_error_requeues() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store.expect_delete_node().never();

    let mut cloud = MockCloudInstances::new();
    cloud
        .expect_instance_exists()
        .returning(|_| Err(CloudError::new("RequestLimitExceeded", "Request limit exceeded.")));
    cloud.expect_instance_shutdown().never();

    let outcome = reconciler(store, no_events(), cloud, false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeued);
}

#[tokio::test]
async fn test_delete_failure_is_reported() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store
        .expect_delete_node()
        .times(1)
        .returning(|_| Err(Error::ConfigError("forbidden".to_string())));

    let outcome = reconciler(store, one_delete_event("NotFound"), cloud_reporting(false, false), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Failed(cause) if cause.contains("forbidden")));
}

#[tokio::test]
async fn test_concurrently_deleted_node_reports_failed_with_cause() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store.expect_delete_node().times(1).returning(|_| {
        Ok(Deletion::AlreadyGone(format!("nodes \"{}\" not found", NODE)))
    });

    let outcome = reconciler(store, one_delete_event("NotFound"), cloud_reporting(false, false), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Failed(format!("nodes \"{}\" not found", NODE))
    );
}

#[tokio::test]
async fn test_event_failure_does_not_block_deletion() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store
        .expect_delete_node()
        .times(1)
        .returning(|_| Ok(Deletion::Deleted));

    let mut events = MockEventSink::new();
    events
        .expect_publish()
        .times(1)
        .returning(|_, _, _, _| Err(Error::ConfigError("events are forbidden".to_string())));

    let outcome = reconciler(store, events, cloud_reporting(false, false), false)
        .reconcile_node(NODE)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted);
}

/// Event sink whose API server never answers
struct StalledEventSink;

#[async_trait]
impl EventSink for StalledEventSink {
    async fn publish(&self, _: &Node, _: &str, _: &str, _: &str) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_event_sink_does_not_block_deletion() {
    let mut store = store_returning(Some(ReadyStatus::False), None);
    store
        .expect_delete_node()
        .times(1)
        .returning(|_| Ok(Deletion::Deleted));

    let reconciler = Reconciler::new(
        ReconcilerConfig {
            provider: ProviderContext::Aws(AwsConfig::default()),
            tolerance: NotFoundTolerance::for_family(ProviderFamily::Aws),
            dry_run: false,
        },
        Arc::new(store),
        Arc::new(StalledEventSink),
        Arc::new(cloud_reporting(false, false)),
    );

    let started = tokio::time::Instant::now();
    let outcome = reconciler.reconcile_node(NODE).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted);
    assert!(started.elapsed() < Duration::from_secs(3600));
}

#[test]
fn test_action_for_backs_off_unsettled_nodes() {
    let tracker = RequeueTracker::new(15, 300);

    assert_eq!(
        action_for(&tracker, NODE, &ReconcileOutcome::Requeued),
        Action::requeue(Duration::from_secs(15))
    );
    assert_eq!(
        action_for(&tracker, NODE, &ReconcileOutcome::Requeued),
        Action::requeue(Duration::from_secs(30))
    );
    assert_eq!(
        action_for(&tracker, NODE, &ReconcileOutcome::Failed("boom".to_string())),
        Action::requeue(Duration::from_secs(60))
    );

    assert_eq!(
        action_for(&tracker, NODE, &ReconcileOutcome::Deleted),
        Action::await_change()
    );
    assert_eq!(tracker.attempts(NODE), 0);
}

#[test]
fn test_action_for_settled_outcomes() {
    let tracker = RequeueTracker::default();
    for outcome in [ReconcileOutcome::Ignored, ReconcileOutcome::DryRunSkipped] {
        assert_eq!(action_for(&tracker, NODE, &outcome), Action::await_change());
    }
}
