//! Ready condition lookup

use std::fmt;

use k8s_openapi::api::core::v1::{Node, NodeCondition};
use kube::ResourceExt;

use crate::error::{Error, Result};

/// Condition type the kubelet uses to report node health
pub const NODE_READY: &str = "Ready";

/// Tri-state status of the node's Ready condition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyStatus {
    True,
    False,
    Unknown,
}

impl ReadyStatus {
    /// Map a condition status string; anything unrecognised is `Unknown`
    pub fn from_condition_status(status: &str) -> Self {
        match status {
            "True" => ReadyStatus::True,
            "False" => ReadyStatus::False,
            _ => ReadyStatus::Unknown,
        }
    }

    /// Not ready, or the kubelet has stopped reporting
    pub fn is_suspect(&self) -> bool {
        !matches!(self, ReadyStatus::True)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyStatus::True => "True",
            ReadyStatus::False => "False",
            ReadyStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ReadyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter to only the Ready condition
pub fn ready_condition(node: &Node) -> Option<&NodeCondition> {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == NODE_READY))
}

/// Status of the Ready condition; a node without one is malformed
pub fn ready_status(node: &Node) -> Result<ReadyStatus> {
    ready_condition(node)
        .map(|c| ReadyStatus::from_condition_status(&c.status))
        .ok_or_else(|| Error::ReadyConditionMissing(node.name_any()))
}
