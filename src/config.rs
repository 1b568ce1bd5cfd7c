//! Command line configuration
//!
//! Flags are parsed with clap and validated into a [`ReconcilerConfig`] before
//! anything talks to the cluster or the cloud.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::cloud::{NotFoundTolerance, ProviderContext, ProviderFamily};
use crate::controller::{ReconcilerConfig, RequeueTracker};
use crate::error::{Error, Result};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Removes Node objects whose cloud instance is gone or shut down
#[derive(Parser, Debug)]
#[command(name = "cloud-lifecycle-controller", version, about)]
pub struct Args {
    /// Cloud provider to use (aws, azure)
    #[arg(long, env = "CLOUD_PROVIDER")]
    pub cloud: String,

    /// Path to cloud provider config file
    #[arg(long, env = "CLOUD_CONFIG")]
    pub cloud_config: Option<PathBuf>,

    /// Cloud zone or region (us-west-2a, eu-central-1, ...)
    #[arg(long, env = "CLOUD_ZONE")]
    pub cloud_zone: Option<String>,

    /// Don't actually delete anything
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// The address the metric endpoint binds to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// The address the probe endpoint binds to
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Provider error code or message fragment meaning "instance not found"
    /// (repeatable; replaces the provider's defaults)
    #[arg(long = "tolerate-error")]
    pub tolerate_errors: Vec<String>,

    /// First requeue delay for nodes whose cloud status has not settled
    #[arg(long, default_value_t = 15)]
    pub requeue_base_seconds: u64,

    /// Upper bound for the requeue delay
    #[arg(long, default_value_t = 300)]
    pub requeue_max_seconds: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn provider_family(&self) -> Result<ProviderFamily> {
        self.cloud.parse()
    }

    /// Load the provider context and assemble the reconciler settings
    pub fn reconciler_config(&self) -> Result<ReconcilerConfig> {
        let family = self.provider_family()?;
        let provider = ProviderContext::load(
            family,
            self.cloud_config.as_deref(),
            self.cloud_zone.as_deref(),
        )?;

        let tolerance = if self.tolerate_errors.is_empty() {
            NotFoundTolerance::for_family(family)
        } else {
            NotFoundTolerance::new(self.tolerate_errors.iter().cloned())
        };

        Ok(ReconcilerConfig {
            provider,
            tolerance,
            dry_run: self.dry_run,
        })
    }

    pub fn requeue_tracker(&self) -> Result<RequeueTracker> {
        if self.requeue_base_seconds == 0 {
            return Err(Error::ConfigError(
                "--requeue-base-seconds must be greater than 0".to_string(),
            ));
        }
        Ok(RequeueTracker::new(
            self.requeue_base_seconds,
            self.requeue_max_seconds,
        ))
    }
}
