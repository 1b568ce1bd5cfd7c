//! cloud-lifecycle-controller
//!
//! Watches Kubernetes Nodes and removes the ones whose backing cloud instance
//! no longer exists or has been shut down, without running a full cloud
//! controller manager.

pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;
pub mod node;
pub mod rest_api;

pub use error::{Error, Result};
