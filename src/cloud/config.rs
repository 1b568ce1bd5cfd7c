//! Provider context loading
//!
//! The provider family is chosen by name on the command line and validated once
//! at startup, so an unsupported cloud never reaches the reconciler.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Supported infrastructure provider families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    /// Amazon EC2
    Aws,
    /// Azure virtual machines and scale sets
    Azure,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Aws => "aws",
            ProviderFamily::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aws" => Ok(ProviderFamily::Aws),
            "azure" => Ok(ProviderFamily::Azure),
            other => Err(Error::ProviderNotSupported(other.to_string())),
        }
    }
}

/// EC2 settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AwsConfig {
    /// Region override; the default provider chain is used when unset
    pub region: Option<String>,
}

impl AwsConfig {
    /// Build from an availability zone or region name
    ///
    /// `us-west-2a` becomes region `us-west-2`; a bare region is kept as is.
    pub fn from_zone(zone: Option<&str>) -> Self {
        let region = zone
            .map(str::trim)
            .filter(|z| !z.is_empty())
            .map(region_from_zone);
        Self { region }
    }
}

fn region_from_zone(zone: &str) -> String {
    let bytes = zone.as_bytes();
    match bytes {
        [.., digit, letter] if digit.is_ascii_digit() && letter.is_ascii_alphabetic() => {
            zone[..zone.len() - 1].to_string()
        }
        _ => zone.to_string(),
    }
}

/// Azure cloud config, in the `azure.json` layout used by the Kubernetes
/// Azure cloud provider
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    /// `vmss` for scale set nodes, anything else for standalone VMs
    pub vm_type: String,
    pub aad_client_id: String,
    pub aad_client_secret: String,
    pub use_managed_identity_extension: bool,
    #[serde(rename = "userAssignedIdentityID")]
    pub user_assigned_identity_id: String,
    pub resource_manager_endpoint: String,
}

impl AzureConfig {
    pub fn uses_scale_sets(&self) -> bool {
        self.vm_type.eq_ignore_ascii_case("vmss")
    }

    fn validate(&self) -> Result<()> {
        if self.subscription_id.trim().is_empty() {
            return Err(Error::ProviderContextInvalid(
                "azure config is missing subscriptionId".to_string(),
            ));
        }
        if self.resource_group.trim().is_empty() {
            return Err(Error::ProviderContextInvalid(
                "azure config is missing resourceGroup".to_string(),
            ));
        }
        Ok(())
    }
}

/// Active provider family together with its configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderContext {
    Aws(AwsConfig),
    Azure(AzureConfig),
}

impl ProviderContext {
    pub fn family(&self) -> ProviderFamily {
        match self {
            ProviderContext::Aws(_) => ProviderFamily::Aws,
            ProviderContext::Azure(_) => ProviderFamily::Azure,
        }
    }

    /// Load and validate the context for `family`
    ///
    /// Azure requires a cloud config file. For AWS a config file is optional and
    /// only its `zone` key is read; `zone` (the `--cloud-zone` flag) wins over it.
    pub fn load(
        family: ProviderFamily,
        cloud_config: Option<&Path>,
        zone: Option<&str>,
    ) -> Result<Self> {
        match family {
            ProviderFamily::Aws => {
                let file_zone = match cloud_config {
                    Some(path) => zone_from_ini(&read_config(path)?),
                    None => None,
                };
                let cfg = AwsConfig::from_zone(zone.or(file_zone.as_deref()));
                match &cfg.region {
                    Some(region) => info!("Using AWS region {}", region),
                    None => info!("No AWS zone configured, relying on the default region chain"),
                }
                Ok(ProviderContext::Aws(cfg))
            }
            ProviderFamily::Azure => {
                let path = cloud_config.ok_or_else(|| {
                    Error::ProviderContextInvalid(
                        "azure requires --cloud-config pointing at azure.json".to_string(),
                    )
                })?;
                if zone.is_some() {
                    warn!("--cloud-zone is ignored for azure");
                }
                Self::from_azure_json(&read_config(path)?)
            }
        }
    }

    /// Parse an `azure.json` document
    pub fn from_azure_json(raw: &str) -> Result<Self> {
        let cfg: AzureConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(ProviderContext::Azure(cfg))
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!(
            "Unable to read cloud provider configuration {}: {}",
            path.display(),
            e
        ))
    })
}

/// Pull `zone=` out of the `[global]` section of a gcfg-style AWS cloud config
fn zone_from_ini(raw: &str) -> Option<String> {
    let mut in_global = false;
    for line in raw.lines().map(str::trim) {
        if line.starts_with('[') {
            in_global = line.eq_ignore_ascii_case("[global]");
            continue;
        }
        if !in_global {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim().eq_ignore_ascii_case("zone") {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
