//! Generated card repository

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::sync::Arc;

use super::{clamp_limit, decode_cursor, encode_cursor, CardStore, Page, RepoError};
use crate::db::models::{get_string, GeneratedCard};
use crate::db::DynamoDbClient;

/// Repository for generated cards
#[derive(Clone)]
pub struct CardRepository {
    client: Arc<DynamoDbClient>,
}

impl CardRepository {
    /// Create a new card repository
    pub fn new(client: Arc<DynamoDbClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CardStore for CardRepository {
    async fn insert_card(&self, card: &GeneratedCard) -> Result<(), RepoError> {
        self.client
            .client()
            .put_item()
            .table_name(self.client.cards_table())
            .set_item(Some(card.to_dynamodb()))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        tracing::debug!(card_id = %card.id, email = ?card.email, "Recorded generated card");

        Ok(())
    }

    async fn list_cards(&self, limit: usize, cursor: Option<&str>) -> Result<Page<GeneratedCard>, RepoError> {
        let start_key = match cursor {
            Some(cursor) => {
                let id = decode_cursor(cursor)?;
                Some(HashMap::from([("id".to_string(), AttributeValue::S(id))]))
            }
            None => None,
        };

        let result = self
            .client
            .client()
            .scan()
            .table_name(self.client.cards_table())
            .limit(clamp_limit(limit))
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(|e| RepoError::DynamoDb(e.to_string()))?;

        let items = result
            .items
            .unwrap_or_default()
            .iter()
            .filter_map(GeneratedCard::from_dynamodb)
            .collect();

        let next_cursor = result
            .last_evaluated_key
            .as_ref()
            .and_then(|key| get_string(key, "id"))
            .map(|id| encode_cursor(&id));

        Ok(Page { items, next_cursor })
    }
}
