//! Kubernetes Event emission for node lifecycle decisions

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource, Node};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, PostParams},
    Client, Resource, ResourceExt,
};

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};

/// Component name recorded as the event source
pub const COMPONENT: &str = "cloud-lifecycle-controller";

/// Reason attached to events announcing a node deletion
pub const DELETE_NODE_REASON: &str = "DeletingNode";

pub const EVENT_TYPE_NORMAL: &str = "Normal";

/// Upper bound on a single publish; events are best effort
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Namespace holding events for cluster-scoped objects
const EVENT_NAMESPACE: &str = "default";

/// Sink for events about a Node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        node: &Node,
        event_type: &str,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

/// Writes `core/v1 Event` objects through the API server
pub struct KubeEventSink {
    api: Api<Event>,
}

impl KubeEventSink {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::namespaced(client, EVENT_NAMESPACE),
        }
    }
}

/// Build the Event object for a node
pub fn node_event(node: &Node, event_type: &str, reason: &str, message: &str) -> Event {
    let time = chrono::Utc::now();
    Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-", node.name_any())),
            namespace: Some(EVENT_NAMESPACE.to_string()),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: node.object_ref(&()),
        source: Some(EventSource {
            component: Some(COMPONENT.to_string()),
            ..Default::default()
        }),
        reporting_component: Some(COMPONENT.to_string()),
        first_timestamp: Some(Time(time)),
        last_timestamp: Some(Time(time)),
        count: Some(1),
        ..Default::default()
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        node: &Node,
        event_type: &str,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let event = node_event(node, event_type, reason, message);
        self.api
            .create(&PostParams::default(), &event)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}
