//! Provider id resolution
//!
//! Nodes registered without a cloud controller have no `spec.providerID`. For
//! those, the id is rebuilt from the node name using the naming convention of
//! the provider family. Ids are recomputed on every pass so they always reflect
//! the current subscription and resource group.

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use super::config::{AzureConfig, ProviderContext};
use crate::error::{Error, Result};

/// Width of the zero-padded instance ordinal at the end of scale set VM names
const AZURE_ORDINAL_WIDTH: usize = 6;

/// Return the node's recorded provider id, or derive one from its name
///
/// A recorded id is authoritative and returned unchanged.
pub fn resolve_provider_id(node: &Node, context: &ProviderContext) -> Result<String> {
    let recorded = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .unwrap_or_default();
    if !recorded.is_empty() {
        return Ok(recorded.to_string());
    }

    generate_provider_id(&node.name_any(), context)
}

/// Derive a provider id from a node name
pub fn generate_provider_id(name: &str, context: &ProviderContext) -> Result<String> {
    match context {
        ProviderContext::Aws(_) => aws_provider_id(name),
        ProviderContext::Azure(cfg) => azure_provider_id(name, cfg),
    }
}

/// Build an EC2 provider id from a node name.
///
/// `k8s-controllers-i-042988b09f6a493cc` becomes `aws:///i-042988b09f6a493cc`.
pub fn aws_provider_id(name: &str) -> Result<String> {
    let parts: Vec<&str> = name.split('-').collect();
    match parts.as_slice() {
        [_, _, "i", id] if !id.is_empty() => Ok(format!("aws:///i-{}", id)),
        _ => Err(Error::InvalidName(name.to_string())),
    }
}

/// Build an Azure provider id from a scale set instance name
pub fn azure_provider_id(name: &str, cfg: &AzureConfig) -> Result<String> {
    let scale_set = extract_azure_scale_set(name)?;
    let vm_id = extract_azure_vm_id(name)?;

    if cfg.uses_scale_sets() {
        Ok(format!(
            "azure:///subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines/{}",
            cfg.subscription_id, cfg.resource_group, scale_set, vm_id
        ))
    } else {
        Ok(format!(
            "azure:///subscriptions/{}/resourceGroups/{}/virtualMachines/{}",
            cfg.subscription_id, cfg.resource_group, vm_id
        ))
    }
}

/// Extract the instance ordinal from a machine name.
///
/// `aks-agentpool-34751183-vmss001001` becomes `1001`.
pub fn extract_azure_vm_id(name: &str) -> Result<String> {
    let invalid = || Error::InvalidName(name.to_string());

    let split = name.len().checked_sub(AZURE_ORDINAL_WIDTH).ok_or_else(invalid)?;
    let suffix = name.get(split..).ok_or_else(invalid)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let ordinal: u64 = suffix.parse().map_err(|_| invalid())?;
    Ok(ordinal.to_string())
}

/// Extract the scale set name from a machine name.
///
/// `aks-agentpool-34751183-vmss001001` becomes `aks-agentpool-34751183-vmss`.
pub fn extract_azure_scale_set(name: &str) -> Result<&str> {
    if name.len() <= AZURE_ORDINAL_WIDTH {
        return Err(Error::InvalidName(name.to_string()));
    }
    name.get(..name.len() - AZURE_ORDINAL_WIDTH)
        .ok_or_else(|| Error::InvalidName(name.to_string()))
}
