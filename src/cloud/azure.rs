//! Azure Resource Manager instance queries
//!
//! Talks to ARM directly over REST: one `instanceView` GET answers both the
//! existence and the power state question. Tokens come from either an AAD app
//! registration or the instance metadata service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::config::AzureConfig;
use super::{CloudError, CloudInstances};
use crate::error::{Error, Result};

const API_VERSION: &str = "2024-07-01";
const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://management.azure.com";
const AAD_ENDPOINT: &str = "https://login.microsoftonline.com";
const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Refresh tokens this long before they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone)]
enum AzureCredential {
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    ManagedIdentity {
        client_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: serde_json::Value,
    #[serde(default)]
    expires_in: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceView {
    #[serde(default)]
    statuses: Vec<InstanceViewStatus>,
}

#[derive(Debug, Deserialize)]
struct InstanceViewStatus {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct ArmErrorResponse {
    error: ArmErrorBody,
}

#[derive(Debug, Deserialize)]
struct ArmErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// [`CloudInstances`] backed by the ARM compute API
pub struct AzureInstances {
    http: reqwest::Client,
    endpoint: String,
    credential: AzureCredential,
    token: RwLock<Option<AccessToken>>,
}

impl AzureInstances {
    pub fn new(cfg: &AzureConfig) -> Result<Self> {
        let credential = if cfg.use_managed_identity_extension {
            AzureCredential::ManagedIdentity {
                client_id: Some(cfg.user_assigned_identity_id.clone()).filter(|id| !id.is_empty()),
            }
        } else if !cfg.aad_client_id.is_empty() && !cfg.aad_client_secret.is_empty() {
            if cfg.tenant_id.is_empty() {
                return Err(Error::ProviderContextInvalid(
                    "azure config has aadClientId but no tenantId".to_string(),
                ));
            }
            AzureCredential::ClientSecret {
                tenant_id: cfg.tenant_id.clone(),
                client_id: cfg.aad_client_id.clone(),
                client_secret: cfg.aad_client_secret.clone(),
            }
        } else {
            return Err(Error::ProviderContextInvalid(
                "azure config needs aadClientId/aadClientSecret or useManagedIdentityExtension"
                    .to_string(),
            ));
        };

        let endpoint = if cfg.resource_manager_endpoint.is_empty() {
            DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string()
        } else {
            cfg.resource_manager_endpoint.trim_end_matches('/').to_string()
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("cloud-lifecycle-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            credential,
            token: RwLock::new(None),
        })
    }

    async fn bearer_token(&self) -> Result<String, CloudError> {
        let now = Utc::now();
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<AccessToken, CloudError> {
        let resource = format!("{}/", self.endpoint);

        let request = match &self.credential {
            AzureCredential::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => {
                debug!("Requesting ARM token for app {}", client_id);
                self.http
                    .post(format!("{}/{}/oauth2/token", AAD_ENDPOINT, tenant_id))
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("resource", resource.as_str()),
                    ])
            }
            AzureCredential::ManagedIdentity { client_id } => {
                debug!("Requesting ARM token from instance metadata service");
                let mut query = vec![("api-version", IMDS_API_VERSION), ("resource", resource.as_str())];
                if let Some(id) = client_id {
                    query.push(("client_id", id.as_str()));
                }
                self.http
                    .get(IMDS_TOKEN_ENDPOINT)
                    .header("Metadata", "true")
                    .query(&query)
            }
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::new(
                "TokenRequestFailed",
                format!("token endpoint returned {}: {}", status, body),
            ));
        }

        let body: TokenResponse = response.json().await?;
        let expires_at = token_expiry(&body, Utc::now());
        info!("Acquired ARM access token valid until {}", expires_at);

        Ok(AccessToken {
            value: body.access_token,
            expires_at,
        })
    }

    /// Fetch the instance view, `None` when ARM reports the VM as gone
    async fn instance_view(&self, provider_id: &str) -> Result<Option<InstanceView>, CloudError> {
        let path = resource_path(provider_id)?;
        let url = format!("{}{}/instanceView?api-version={}", self.endpoint, path, API_VERSION);
        let token = self.bearer_token().await?;

        debug!("Querying ARM instance view: {}", url);
        let response = self.http.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("ARM reports {} as not found", provider_id);
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(arm_error(status, &body));
        }

        Ok(Some(response.json::<InstanceView>().await?))
    }
}

#[async_trait]
impl CloudInstances for AzureInstances {
    async fn instance_exists(&self, provider_id: &str) -> Result<bool, CloudError> {
        Ok(self.instance_view(provider_id).await?.is_some())
    }

    async fn instance_shutdown(&self, provider_id: &str) -> Result<bool, CloudError> {
        Ok(self
            .instance_view(provider_id)
            .await?
            .map(|view| is_powered_off(&view))
            .unwrap_or(false))
    }
}

/// Translate an Azure provider id into an ARM resource path
///
/// Standalone VM ids built from node names omit `/providers/Microsoft.Compute`;
/// it is inserted so the path addresses the compute resource.
pub fn resource_path(provider_id: &str) -> Result<String, CloudError> {
    let path = provider_id
        .strip_prefix("azure://")
        .filter(|p| p.starts_with("/subscriptions/"))
        .ok_or_else(|| CloudError::message(format!("not an azure provider id: {}", provider_id)))?;

    if path.contains("/providers/") {
        return Ok(path.to_string());
    }

    match path.split_once("/virtualMachines/") {
        Some((scope, name)) if !name.is_empty() => Ok(format!(
            "{}/providers/Microsoft.Compute/virtualMachines/{}",
            scope, name
        )),
        _ => Err(CloudError::message(format!(
            "provider id {} does not name a virtual machine",
            provider_id
        ))),
    }
}

fn is_powered_off(view: &InstanceView) -> bool {
    view.statuses
        .iter()
        .filter_map(|s| s.code.strip_prefix("PowerState/"))
        .any(|state| state.eq_ignore_ascii_case("stopped") || state.eq_ignore_ascii_case("deallocated"))
}

fn arm_error(status: StatusCode, body: &str) -> CloudError {
    match serde_json::from_str::<ArmErrorResponse>(body) {
        Ok(parsed) if !parsed.error.code.is_empty() => {
            CloudError::new(parsed.error.code, parsed.error.message)
        }
        _ => CloudError::message(format!("ARM returned {}: {}", status, body)),
    }
}

fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn token_expiry(body: &TokenResponse, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(at) = json_i64(&body.expires_on).and_then(|ts| Utc.timestamp_opt(ts, 0).single()) {
        return at;
    }
    let lifetime = json_i64(&body.expires_in).unwrap_or(3600);
    now + chrono::Duration::seconds(lifetime)
}
