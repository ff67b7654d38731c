//! In-memory storage
//!
//! Implements the storage traits over process-local maps. Used for local
//! development (`STORAGE_BACKEND=memory`) and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;

use crate::db::models::{GeneratedCard, OtpRecord, User, UserProfile};
use crate::db::repositories::{
    decode_cursor, encode_cursor, CardStore, OtpCheck, OtpStore, Page, RepoError, UpsertOutcome,
    UserStore,
};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<BTreeMap<String, User>>,
    otps: RwLock<HashMap<String, OtpRecord>>,
    cards: RwLock<BTreeMap<String, GeneratedCard>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn card_count(&self) -> usize {
        self.cards.read().await.len()
    }
}

/// Key-ordered page over a BTreeMap, resuming after the cursor's key
fn page_of<T: Clone>(
    map: &BTreeMap<String, T>,
    limit: usize,
    cursor: Option<&str>,
) -> Result<Page<T>, RepoError> {
    let start = match cursor {
        Some(cursor) => Bound::Excluded(decode_cursor(cursor)?),
        None => Bound::Unbounded,
    };

    let limit = limit.max(1);
    let mut entries = map.range((start, Bound::Unbounded));
    let items: Vec<(&String, &T)> = entries.by_ref().take(limit).collect();
    let has_more = entries.next().is_some();

    let next_cursor = if has_more {
        items.last().map(|(key, _)| encode_cursor(key))
    } else {
        None
    };

    Ok(Page {
        items: items.into_iter().map(|(_, value)| value.clone()).collect(),
        next_cursor,
    })
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_verified(&self, profile: &UserProfile, now: i64) -> Result<UpsertOutcome, RepoError> {
        let mut users = self.users.write().await;
        let previous = users.get(&profile.email);
        let created = previous.is_none();
        let user = User::from_profile(profile, previous, now);
        users.insert(user.email.clone(), user.clone());

        Ok(UpsertOutcome { user, created })
    }

    async fn get_user(&self, email: &str) -> Result<Option<User>, RepoError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn list_users(&self, limit: usize, cursor: Option<&str>) -> Result<Page<User>, RepoError> {
        page_of(&*self.users.read().await, limit, cursor)
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn put_otp(&self, record: &OtpRecord) -> Result<(), RepoError> {
        self.otps
            .write()
            .await
            .insert(record.email.clone(), record.clone());
        Ok(())
    }

    async fn get_otp(&self, email: &str) -> Result<Option<OtpRecord>, RepoError> {
        Ok(self.otps.read().await.get(email).cloned())
    }

    async fn delete_otp(&self, email: &str) -> Result<(), RepoError> {
        self.otps.write().await.remove(email);
        Ok(())
    }

    async fn consume_otp(
        &self,
        email: &str,
        code: &str,
        now: i64,
        max_attempts: u32,
    ) -> Result<OtpCheck, RepoError> {
        let mut otps = self.otps.write().await;
        let Some(record) = otps.get_mut(email) else {
            return Ok(OtpCheck::Missing);
        };

        let check = if record.is_expired(now) {
            OtpCheck::Expired
        } else if record.attempts >= max_attempts {
            OtpCheck::Exhausted
        } else if record.matches(code) {
            OtpCheck::Verified
        } else {
            record.attempts += 1;
            if record.attempts >= max_attempts {
                OtpCheck::Exhausted
            } else {
                OtpCheck::Mismatch {
                    attempts: record.attempts,
                }
            }
        };

        if !matches!(check, OtpCheck::Mismatch { .. }) {
            otps.remove(email);
        }
        Ok(check)
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn insert_card(&self, card: &GeneratedCard) -> Result<(), RepoError> {
        self.cards.write().await.insert(card.id.clone(), card.clone());
        Ok(())
    }

    async fn list_cards(&self, limit: usize, cursor: Option<&str>) -> Result<Page<GeneratedCard>, RepoError> {
        page_of(&*self.cards.read().await, limit, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(email: &str, name: &str) -> UserProfile {
        UserProfile {
            email: email.to_string(),
            name: name.to_string(),
            phone: "+15550100".to_string(),
            social_handle: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_updates_instead_of_duplicating() {
        let store = MemoryStore::new();

        let first = store.upsert_verified(&profile("ana@example.com", "Ana"), 100).await.unwrap();
        assert!(first.created);

        let second = store
            .upsert_verified(&profile("ana@example.com", "Ana Maria"), 200)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.user.name, "Ana Maria");
        assert_eq!(second.user.created_at, 100);
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_consume_counts_wrong_guesses_then_deletes() {
        let store = MemoryStore::new();
        store
            .put_otp(&OtpRecord::new("ana@example.com", "123456", 0, 600))
            .await
            .unwrap();

        assert_eq!(
            store.consume_otp("ana@example.com", "000000", 1, 3).await.unwrap(),
            OtpCheck::Mismatch { attempts: 1 }
        );
        assert_eq!(
            store.consume_otp("ana@example.com", "000000", 1, 3).await.unwrap(),
            OtpCheck::Mismatch { attempts: 2 }
        );
        assert_eq!(
            store.consume_otp("ana@example.com", "000000", 1, 3).await.unwrap(),
            OtpCheck::Exhausted
        );
        assert!(store.get_otp("ana@example.com").await.unwrap().is_none());
        assert_eq!(
            store.consume_otp("ana@example.com", "123456", 1, 3).await.unwrap(),
            OtpCheck::Missing
        );
    }

    #[tokio::test]
    async fn test_consume_deletes_matching_and_expired_codes() {
        let store = MemoryStore::new();
        store.put_otp(&OtpRecord::new("ana@example.com", "123456", 0, 600)).await.unwrap();
        store.put_otp(&OtpRecord::new("bob@example.com", "654321", 0, 600)).await.unwrap();

        assert_eq!(
            store.consume_otp("ana@example.com", "123456", 10, 5).await.unwrap(),
            OtpCheck::Verified
        );
        assert_eq!(
            store.consume_otp("ana@example.com", "123456", 11, 5).await.unwrap(),
            OtpCheck::Missing
        );

        assert_eq!(
            store.consume_otp("bob@example.com", "654321", 600, 5).await.unwrap(),
            OtpCheck::Expired
        );
        assert!(store.get_otp("bob@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_otp_replaces_pending_code() {
        let store = MemoryStore::new();
        store.put_otp(&OtpRecord::new("ana@example.com", "111111", 0, 600)).await.unwrap();
        store.put_otp(&OtpRecord::new("ana@example.com", "222222", 5, 600)).await.unwrap();

        let otp = store.get_otp("ana@example.com").await.unwrap().unwrap();
        assert_eq!(otp.code, "222222");
    }

    #[tokio::test]
    async fn test_pagination_walks_every_user_once() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .upsert_verified(&profile(&format!("user{i}@example.com"), "U"), 0)
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store.list_users(2, cursor.as_deref()).await.unwrap();
            seen.extend(page.items.into_iter().map(|u| u.email));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], "user0@example.com");
        assert_eq!(seen[4], "user4@example.com");
    }
}
