//! Central error types for the cloud lifecycle controller
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use thiserror::Error;

use crate::cloud::CloudError;

/// Central error type for the cloud lifecycle controller
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No provider id builder exists for the named cloud
    #[error("provider not supported: {0}")]
    ProviderNotSupported(String),

    /// Node name does not follow the provider's naming convention
    #[error("vm id is invalid: {0}")]
    InvalidName(String),

    /// Provider context does not match the declared provider family
    #[error("invalid provider context: {0}")]
    ProviderContextInvalid(String),

    /// Classification was requested for an empty provider id
    #[error("provider id is empty")]
    ProviderIdEmpty,

    /// Node record carries no Ready condition at all
    #[error("unable to find NodeReady condition on node {0}")]
    ReadyConditionMissing(String),

    /// Infrastructure provider call failed
    #[error("Cloud provider error: {0}")]
    CloudError(#[from] CloudError),

    /// HTTP request error (from reqwest)
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Result type alias for controller operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error type should trigger a retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::CloudError(_) | Error::HttpError(_)
        )
    }
}
