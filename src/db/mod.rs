//! Database module
//!
//! Contains the storage traits, the DynamoDB implementation and the
//! in-memory implementation.

pub mod dynamodb;
pub mod memory;
pub mod models;
pub mod repositories;

pub use dynamodb::DynamoDbClient;
pub use memory::MemoryStore;
pub use models::{GeneratedCard, OtpRecord, User, UserProfile};
pub use repositories::{
    CardRepository, CardStore, OtpCheck, OtpRepository, OtpStore, Page, RepoError, UpsertOutcome,
    UserRepository, UserStore,
};

use std::sync::Arc;

/// Storage handles shared by the services
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserStore>,
    pub otps: Arc<dyn OtpStore>,
    pub cards: Arc<dyn CardStore>,
    /// Present when backed by DynamoDB, for readiness checks
    dynamodb: Option<Arc<DynamoDbClient>>,
}

impl Storage {
    /// DynamoDB-backed storage
    pub fn dynamodb(client: Arc<DynamoDbClient>) -> Self {
        Self {
            users: Arc::new(UserRepository::new(client.clone())),
            otps: Arc::new(OtpRepository::new(client.clone())),
            cards: Arc::new(CardRepository::new(client.clone())),
            dynamodb: Some(client),
        }
    }

    /// All three stores backed by one in-memory store
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            otps: store.clone(),
            cards: store,
            dynamodb: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        if self.dynamodb.is_some() {
            "dynamodb"
        } else {
            "memory"
        }
    }

    pub async fn health_check(&self) -> bool {
        match &self.dynamodb {
            Some(client) => client.health_check().await,
            None => true,
        }
    }
}
