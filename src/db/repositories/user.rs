//! User repository
//!
//! Data access layer for registered users.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use std::collections::HashMap;
use std::sync::Arc;

use super::{clamp_limit, decode_cursor, encode_cursor, Page, RepoError, UpsertOutcome, UserStore};
use crate::db::models::{get_string, User, UserProfile};
use crate::db::DynamoDbClient;

/// Repository for user operations
#[derive(Clone)]
pub struct UserRepository {
    client: Arc<DynamoDbClient>,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(client: Arc<DynamoDbClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    /// One UpdateItem keyed on email; re-verification never adds a record.
    async fn upsert_verified(&self, profile: &UserProfile, now: i64) -> Result<UpsertOutcome, RepoError> {
        let mut update_expr = "SET #name = :name, phone = :phone, verified = :verified, \
             updated_at = :now, created_at = if_not_exists(created_at, :now)"
            .to_string();

        let mut request = self
            .client
            .client()
            .update_item()
            .table_name(self.client.users_table())
            .key("email", AttributeValue::S(profile.email.clone()))
            .expression_attribute_names("#name", "name")
            .expression_attribute_values(":name", AttributeValue::S(profile.name.clone()))
            .expression_attribute_values(":phone", AttributeValue::S(profile.phone.clone()))
            .expression_attribute_values(":verified", AttributeValue::Bool(true))
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
            .return_values(ReturnValue::AllOld);

        if let Some(ref handle) = profile.social_handle {
            update_expr.push_str(", social_handle = :social");
            request = request.expression_attribute_values(":social", AttributeValue::S(handle.clone()));
        }

        let result = request
            .update_expression(update_expr)
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        let previous = result
            .attributes
            .filter(|attrs| !attrs.is_empty())
            .and_then(|attrs| User::from_dynamodb(&attrs));

        let user = User::from_profile(profile, previous.as_ref(), now);

        tracing::debug!(
            email = %user.email,
            created = previous.is_none(),
            "Upserted verified user"
        );

        Ok(UpsertOutcome {
            user,
            created: previous.is_none(),
        })
    }

    async fn get_user(&self, email: &str) -> Result<Option<User>, RepoError> {
        let result = self
            .client
            .client()
            .get_item()
            .table_name(self.client.users_table())
            .key("email", AttributeValue::S(email.to_string()))
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => User::from_dynamodb(&item)
                .map(Some)
                .ok_or_else(|| RepoError::ParseError("Failed to parse user".to_string())),
            None => Ok(None),
        }
    }

    async fn list_users(&self, limit: usize, cursor: Option<&str>) -> Result<Page<User>, RepoError> {
        let start_key = match cursor {
            Some(cursor) => {
                let email = decode_cursor(cursor)?;
                Some(HashMap::from([("email".to_string(), AttributeValue::S(email))]))
            }
            None => None,
        };

        let result = self
            .client
            .client()
            .scan()
            .table_name(self.client.users_table())
            .limit(clamp_limit(limit))
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        let items = result
            .items
            .unwrap_or_default()
            .iter()
            .filter_map(User::from_dynamodb)
            .collect();

        let next_cursor = result
            .last_evaluated_key
            .as_ref()
            .and_then(|key| get_string(key, "email"))
            .map(|email| encode_cursor(&email));

        Ok(Page { items, next_cursor })
    }
}
