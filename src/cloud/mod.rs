//! Infrastructure provider access
//!
//! Everything the controller needs from a cloud: the provider context loaded at
//! startup, provider id derivation for nodes that lack one, and the two instance
//! queries used to classify a node's backing machine.

mod aws;
mod azure;
mod config;
pub mod provider_id;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

pub use aws::{instance_id_from_provider_id, AwsInstances};
pub use azure::{resource_path, AzureInstances};
pub use config::{AwsConfig, AzureConfig, ProviderContext, ProviderFamily};
pub use provider_id::resolve_provider_id;

/// Failure reported by an infrastructure provider call
///
/// `code` carries the provider's machine-readable error code when one was
/// returned (e.g. `InvalidInstanceID.NotFound`, `ResourceNotFound`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudError {
    pub code: Option<String>,
    pub message: String,
}

impl CloudError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Error without a provider code (transport failures, malformed ids)
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CloudError {}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        CloudError::message(e.to_string())
    }
}

/// Instance queries answered by an infrastructure provider
///
/// Implementations may report a missing instance either as `Ok(false)` or as an
/// error shaped like "not found"; the classifier decides which errors to
/// tolerate via [`NotFoundTolerance`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudInstances: Send + Sync {
    /// Whether the instance behind `provider_id` still exists
    async fn instance_exists(&self, provider_id: &str) -> Result<bool, CloudError>;

    /// Whether the instance behind `provider_id` is shut down
    async fn instance_shutdown(&self, provider_id: &str) -> Result<bool, CloudError>;
}

/// Predicate selecting provider errors that only mean "instance not found"
///
/// An error is tolerated when its code equals one of the patterns or its
/// message contains one of them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotFoundTolerance {
    patterns: Vec<String>,
}

impl NotFoundTolerance {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Tolerance that accepts no errors
    pub fn none() -> Self {
        Self::default()
    }

    /// Built-in tolerance for a provider family
    ///
    /// EC2 reports terminated-and-reaped instances as a failed request rather
    /// than an empty result.
    pub fn for_family(family: ProviderFamily) -> Self {
        match family {
            ProviderFamily::Aws => Self::new(["InvalidInstanceID.NotFound", "does not exist"]),
            ProviderFamily::Azure => Self::none(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn tolerates(&self, err: &CloudError) -> bool {
        self.patterns.iter().any(|pattern| {
            err.code.as_deref() == Some(pattern.as_str()) || err.message.contains(pattern.as_str())
        })
    }
}

/// Build the instance backend for the configured provider
pub async fn instances_for(context: &ProviderContext) -> Result<Arc<dyn CloudInstances>> {
    match context {
        ProviderContext::Aws(cfg) => Ok(Arc::new(AwsInstances::new(cfg).await)),
        ProviderContext::Azure(cfg) => Ok(Arc::new(AzureInstances::new(cfg)?)),
    }
}
