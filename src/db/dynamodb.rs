//! DynamoDB client wrapper
//!
//! This module provides a wrapper around the AWS DynamoDB SDK client
//! carrying the table names from settings.

use aws_sdk_dynamodb::Client as DynamoDbSdkClient;
use crate::config::Settings;
use std::sync::Arc;

/// DynamoDB client wrapper for database operations.
#[derive(Clone)]
pub struct DynamoDbClient {
    /// Application settings
    settings: Arc<Settings>,

    /// AWS DynamoDB SDK client
    client: DynamoDbSdkClient,
}

impl DynamoDbClient {
    /// Create a new DynamoDB client.
    pub fn new(settings: Arc<Settings>, client: DynamoDbSdkClient) -> Self {
        Self { settings, client }
    }

    /// Get a reference to the underlying AWS SDK client
    pub fn client(&self) -> &DynamoDbSdkClient {
        &self.client
    }

    pub fn users_table(&self) -> &str {
        &self.settings.dynamodb_users_table
    }

    pub fn otps_table(&self) -> &str {
        &self.settings.dynamodb_otps_table
    }

    pub fn cards_table(&self) -> &str {
        &self.settings.dynamodb_cards_table
    }

    /// Check if the DynamoDB connection is healthy
    ///
    /// Performs a simple list_tables operation to verify connectivity.
    pub async fn health_check(&self) -> bool {
        match self.client.list_tables().limit(1).send().await {
            Ok(_) => {
                tracing::debug!("DynamoDB health check passed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "DynamoDB health check failed");
                false
            }
        }
    }
}
