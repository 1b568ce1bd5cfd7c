//! EC2 instance queries

use async_trait::async_trait;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::types::InstanceStateName;
use tracing::debug;

use super::config::AwsConfig;
use super::{CloudError, CloudInstances};

const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";

/// [`CloudInstances`] backed by `DescribeInstances`
pub struct AwsInstances {
    client: aws_sdk_ec2::Client,
}

impl AwsInstances {
    pub async fn new(cfg: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &cfg.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;
        Self {
            client: aws_sdk_ec2::Client::new(&shared),
        }
    }

    /// Current state of the instance, `None` when EC2 no longer knows it
    async fn instance_state(&self, provider_id: &str) -> Result<Option<InstanceStateName>, CloudError> {
        let instance_id = instance_id_from_provider_id(provider_id)?;

        let output = match self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.code() == Some(INSTANCE_NOT_FOUND) {
                        debug!("EC2 reports {} as not found", instance_id);
                        return Ok(None);
                    }
                    return Err(CloudError {
                        code: service_err.code().map(String::from),
                        message: service_err
                            .message()
                            .map(String::from)
                            .unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
                    });
                }
                return Err(CloudError::message(DisplayErrorContext(&err).to_string()));
            }
        };

        let state = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(instance_id))
            .map(|instance| {
                instance
                    .state()
                    .and_then(|s| s.name())
                    .cloned()
                    .unwrap_or_else(|| InstanceStateName::from("unknown"))
            });

        debug!("EC2 state for {}: {:?}", instance_id, state);
        Ok(state)
    }
}

#[async_trait]
impl CloudInstances for AwsInstances {
    async fn instance_exists(&self, provider_id: &str) -> Result<bool, CloudError> {
        Ok(matches!(
            self.instance_state(provider_id).await?,
            Some(state) if state != InstanceStateName::Terminated
        ))
    }

    async fn instance_shutdown(&self, provider_id: &str) -> Result<bool, CloudError> {
        Ok(self.instance_state(provider_id).await? == Some(InstanceStateName::Stopped))
    }
}

/// Extract the EC2 instance id from a provider id
///
/// Accepts `aws:///<zone>/i-…`, `aws:///i-…` and `aws://<zone>/i-…`.
pub fn instance_id_from_provider_id(provider_id: &str) -> Result<&str, CloudError> {
    let path = provider_id
        .strip_prefix("aws://")
        .ok_or_else(|| CloudError::message(format!("not an aws provider id: {}", provider_id)))?;

    match path.rsplit('/').next() {
        Some(id) if id.len() > 2 && id.starts_with("i-") => Ok(id),
        _ => Err(CloudError::message(format!(
            "provider id {} does not name an EC2 instance",
            provider_id
        ))),
    }
}
