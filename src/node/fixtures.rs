//! Node builders shared by unit tests

use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use super::{ReadyStatus, NODE_READY};

/// Node with a MemoryPressure condition and, optionally, a Ready condition
pub(crate) fn node_with_ready(
    name: &str,
    ready: Option<ReadyStatus>,
    provider_id: Option<&str>,
) -> Node {
    let mut conditions = vec![NodeCondition {
        type_: "MemoryPressure".to_string(),
        status: "False".to_string(),
        ..Default::default()
    }];

    if let Some(status) = ready {
        conditions.push(NodeCondition {
            type_: NODE_READY.to_string(),
            status: status.as_str().to_string(),
            reason: Some(match status {
                ReadyStatus::True => "KubeletReady".to_string(),
                ReadyStatus::False => "KubeletNotReady".to_string(),
                ReadyStatus::Unknown => "NodeStatusUnknown".to_string(),
            }),
            last_transition_time: Some(Time(chrono::Utc::now())),
            ..Default::default()
        });
    }

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("uid-{}", name)),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(String::from),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(conditions),
            ..Default::default()
        }),
    }
}
