//! Instance status classification
//!
//! Turns the provider's existence and shutdown answers into one of three
//! statuses. `Unknown` covers every case where the provider has not confirmed
//! that the instance is gone; it never drives a deletion.

use std::fmt;

use tracing::debug;

use crate::cloud::{CloudInstances, NotFoundTolerance};
use crate::error::{Error, Result};

/// Provider-side status of a node's backing instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    /// Instance exists and is not shut down, or the provider could not say
    Unknown,
    /// Instance no longer exists
    NotFound,
    /// Instance exists but is shut down
    Shutdown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Unknown => "Unknown",
            InstanceStatus::NotFound => "NotFound",
            InstanceStatus::Shutdown => "Shutdown",
        }
    }

    /// Whether this status justifies removing the node record
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::NotFound | InstanceStatus::Shutdown)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the instance behind `provider_id`
///
/// An `Err` means the status is `Unknown` for this pass; the error says why.
/// Errors accepted by `tolerance` are treated as inconclusive answers rather
/// than failures. Shutdown is only queried for instances that exist.
pub async fn classify_instance(
    instances: &dyn CloudInstances,
    tolerance: &NotFoundTolerance,
    provider_id: &str,
) -> Result<InstanceStatus> {
    if provider_id.is_empty() {
        return Err(Error::ProviderIdEmpty);
    }

    match instances.instance_exists(provider_id).await {
        Ok(false) => return Ok(InstanceStatus::NotFound),
        Ok(true) => {}
        Err(e) if tolerance.tolerates(&e) => {
            debug!("Tolerating existence check error for {}: {}", provider_id, e);
        }
        Err(e) => return Err(Error::CloudError(e)),
    }

    match instances.instance_shutdown(provider_id).await {
        Ok(true) => Ok(InstanceStatus::Shutdown),
        Ok(false) => Ok(InstanceStatus::Unknown),
        Err(e) if tolerance.tolerates(&e) => {
            debug!("Tolerating shutdown check error for {}: {}", provider_id, e);
            Ok(InstanceStatus::Unknown)
        }
        Err(e) => Err(Error::CloudError(e)),
    }
}
