//! Cluster access for Node records

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};

/// Result of a delete request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// The record was removed by someone else first; carries the API's answer
    AlreadyGone(String),
}

/// Trait abstracting Node reads and deletes
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a Node by name; `None` when it no longer exists
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Delete a Node by name
    async fn delete_node(&self, name: &str) -> Result<Deletion>;
}

/// Real Kubernetes client implementation
pub struct KubeNodeStore {
    api: Api<Node>,
}

impl KubeNodeStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        match self.api.get(name).await {
            Ok(node) => Ok(Some(node)),
            Err(e) if is_not_found(&e) => {
                debug!("Node {} not found", name);
                Ok(None)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn delete_node(&self, name: &str) -> Result<Deletion> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(Deletion::Deleted),
            Err(e) if is_not_found(&e) => Ok(Deletion::AlreadyGone(e.to_string())),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}
