//! OTP repository
//!
//! Pending verification codes. DynamoDB's TTL sweeps expired records
//! eventually, so `consume_otp` checks `expires_at` in its conditions.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use std::sync::Arc;

use super::{OtpCheck, OtpStore, RepoError};
use crate::db::models::OtpRecord;
use crate::db::DynamoDbClient;

/// Repository for OTP operations
#[derive(Clone)]
pub struct OtpRepository {
    client: Arc<DynamoDbClient>,
}

impl OtpRepository {
    /// Create a new OTP repository
    pub fn new(client: Arc<DynamoDbClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OtpStore for OtpRepository {
    async fn put_otp(&self, record: &OtpRecord) -> Result<(), RepoError> {
        self.client
            .client()
            .put_item()
            .table_name(self.client.otps_table())
            .set_item(Some(record.to_dynamodb()))
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        tracing::debug!(email = %record.email, expires_at = record.expires_at, "Stored OTP");

        Ok(())
    }

    async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>, RepoError> {
        let result = self
            .client
            .client()
            .get_item()
            .table_name(self.client.otps_table())
            .key("email", AttributeValue::S(email.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => OtpRecord::from_dynamodb(&item)
                .map(Some)
                .ok_or_else(|| RepoError::ParseError("Failed to parse OTP record".to_string())),
            None => Ok(None),
        }
    }

    async fn delete_otp(&self, email: &str) -> Result<(), RepoError> {
        self.client
            .client()
            .delete_item()
            .table_name(self.client.otps_table())
            .key("email", AttributeValue::S(email.to_string()))
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    async fn consume_otp(
        &self,
        email: &str,
        code: &str,
        now: i64,
        max_attempts: u32,
    ) -> Result<OtpCheck, RepoError> {
        let code = code.trim();

        // A live matching code is deleted in one conditional write
        let deleted = self
            .client
            .client()
            .delete_item()
            .table_name(self.client.otps_table())
            .key("email", AttributeValue::S(email.to_string()))
            .condition_expression("#code = :code AND #expires_at > :now AND #attempts < :max")
            .expression_attribute_names("#code", "code")
            .expression_attribute_names("#expires_at", "expires_at")
            .expression_attribute_names("#attempts", "attempts")
            .expression_attribute_values(":code", AttributeValue::S(code.to_string()))
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
            .expression_attribute_values(":max", AttributeValue::N(max_attempts.to_string()))
            .send()
            .await;

        match deleted {
            Ok(_) => return Ok(OtpCheck::Verified),
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_conditional_check_failed_exception() {
                    return Err(RepoError::DynamoDb(service_error.to_string()));
                }
            }
        }

        // Wrong guess against a live code: count it, guarded by the budget
        let bumped = self
            .client
            .client()
            .update_item()
            .table_name(self.client.otps_table())
            .key("email", AttributeValue::S(email.to_string()))
            .update_expression("ADD #attempts :one")
            .condition_expression(
                "attribute_exists(email) AND #code <> :code AND #expires_at > :now AND #attempts < :max",
            )
            .expression_attribute_names("#code", "code")
            .expression_attribute_names("#expires_at", "expires_at")
            .expression_attribute_names("#attempts", "attempts")
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .expression_attribute_values(":code", AttributeValue::S(code.to_string()))
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
            .expression_attribute_values(":max", AttributeValue::N(max_attempts.to_string()))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match bumped {
            Ok(output) => {
                let record = output
                    .attributes
                    .as_ref()
                    .and_then(OtpRecord::from_dynamodb)
                    .ok_or_else(|| RepoError::ParseError("Failed to parse OTP record".to_string()))?;

                if record.attempts >= max_attempts {
                    self.delete_record(&record).await?;
                    return Ok(OtpCheck::Exhausted);
                }
                return Ok(OtpCheck::Mismatch {
                    attempts: record.attempts,
                });
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_conditional_check_failed_exception() {
                    return Err(RepoError::DynamoDb(service_error.to_string()));
                }
            }
        }

        // Neither write applied: the code is missing, expired or spent
        let Some(record) = self.get_otp(email).await? else {
            return Ok(OtpCheck::Missing);
        };
        if record.is_expired(now) {
            self.delete_record(&record).await?;
            return Ok(OtpCheck::Expired);
        }
        if record.attempts >= max_attempts {
            self.delete_record(&record).await?;
            return Ok(OtpCheck::Exhausted);
        }

        // Replaced by a fresh code between the writes above
        Ok(OtpCheck::Missing)
    }
}

impl OtpRepository {
    /// Delete `record` unless a newer code has replaced it meanwhile
    async fn delete_record(&self, record: &OtpRecord) -> Result<(), RepoError> {
        let result = self
            .client
            .client()
            .delete_item()
            .table_name(self.client.otps_table())
            .key("email", AttributeValue::S(record.email.clone()))
            .condition_expression("created_at = :created AND #code = :code")
            .expression_attribute_names("#code", "code")
            .expression_attribute_values(":created", AttributeValue::N(record.created_at.to_string()))
            .expression_attribute_values(":code", AttributeValue::S(record.code.clone()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(())
                } else {
                    Err(RepoError::DynamoDb(service_error.to_string()))
                }
            }
        }
    }
}
