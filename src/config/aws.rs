//! AWS SDK configuration
//!
//! Builds the DynamoDB client, supporting a custom endpoint for DynamoDB Local
//! or LocalStack during development.

use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::Client as DynamoDbSdkClient;

use crate::config::Settings;

/// AWS configuration builder
pub struct AwsConfigBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> AwsConfigBuilder<'a> {
    /// Create a new AWS configuration builder
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Build the base AWS SDK configuration (region + default credential chain)
    pub async fn build_sdk_config(&self) -> SdkConfig {
        let region_provider = RegionProviderChain::first_try(Region::new(self.settings.aws_region.clone()))
            .or_default_provider();

        aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await
    }

    /// Create a DynamoDB client with optional custom endpoint
    ///
    /// If `DYNAMODB_ENDPOINT_URL` is set in settings, the client will use
    /// that endpoint.
    pub async fn build_dynamodb_client(&self) -> DynamoDbSdkClient {
        let sdk_config = self.build_sdk_config().await;

        if let Some(endpoint_url) = &self.settings.dynamodb_endpoint_url {
            tracing::info!(endpoint = %endpoint_url, "Using custom DynamoDB endpoint");

            let dynamodb_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint_url)
                .build();

            DynamoDbSdkClient::from_conf(dynamodb_config)
        } else {
            DynamoDbSdkClient::new(&sdk_config)
        }
    }
}

/// Create a DynamoDB client from settings (convenience function)
pub async fn create_dynamodb_client(settings: &Settings) -> DynamoDbSdkClient {
    AwsConfigBuilder::new(settings).build_dynamodb_client().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_sdk_config_uses_settings_region() {
        let mut settings = Settings::default();
        settings.aws_region = "eu-west-1".to_string();
        let config = AwsConfigBuilder::new(&settings).build_sdk_config().await;

        assert_eq!(config.region().unwrap().as_ref(), "eu-west-1");
    }

    #[tokio::test]
    async fn test_custom_endpoint_dynamodb() {
        let mut settings = Settings::default();
        settings.dynamodb_endpoint_url = Some("http://localhost:8001".to_string());

        let _client = create_dynamodb_client(&settings).await;
    }
}
