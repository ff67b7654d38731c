//! Admin dashboard statistics
//!
//! Counts registrations, saved cards and hosted postcards per UTC day over an
//! inclusive date range. Database collections are paged in full; Cloudinary
//! is paged newest-first and stops once it passes the start of the range.

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{CardStore, RepoError, UserStore};
use crate::error::ApiError;
use crate::services::cloudinary::{CloudinaryClient, CloudinaryError};

const SCAN_PAGE_SIZE: usize = 500;
const SEARCH_PAGE_SIZE: u32 = 500;
/// Upper bound on Cloudinary search calls per request
const MAX_SEARCH_PAGES: usize = 20;
const MAX_RANGE_DAYS: i64 = 366;
const DEFAULT_RANGE_DAYS: i64 = 30;

/// Inclusive range of UTC calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ApiError> {
        if from > to {
            return Err(ApiError::bad_request("`from` must not be after `to`"));
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(ApiError::bad_request(format!(
                "Date range is limited to {} days",
                MAX_RANGE_DAYS
            )));
        }
        Ok(Self { from, to })
    }

    /// Range from optional `YYYY-MM-DD` bounds; defaults to the 30 days
    /// ending `today`
    pub fn parse(from: Option<&str>, to: Option<&str>, today: NaiveDate) -> Result<Self, ApiError> {
        let parse = |value: &str, field: &str| {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .map_err(|_| ApiError::bad_request(format!("`{}` must be a YYYY-MM-DD date", field)))
        };

        let to = match to {
            Some(value) => parse(value, "to")?,
            None => today,
        };
        let from = match from {
            Some(value) => parse(value, "from")?,
            None => to
                .checked_sub_signed(Duration::days(DEFAULT_RANGE_DAYS - 1))
                .ok_or_else(|| ApiError::bad_request("`to` is out of range"))?,
        };

        Self::new(from, to)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }

    fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let from = self.from;
        let len = (self.to - self.from).num_days();
        (0..=len).map(move |offset| from + Duration::days(offset))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountSummary {
    /// All records, regardless of date
    pub total: u64,
    /// Records created within the range
    pub in_range: u64,
    /// One entry per day of the range, zero-filled
    pub by_date: Vec<DailyCount>,
}

/// Day-by-day tally over a range
struct Tally {
    range: DateRange,
    total: u64,
    days: BTreeMap<NaiveDate, u64>,
}

impl Tally {
    fn new(range: DateRange) -> Self {
        Self {
            range,
            total: 0,
            days: range.days().map(|day| (day, 0)).collect(),
        }
    }

    fn add(&mut self, date: Option<NaiveDate>) {
        self.total += 1;
        if let Some(date) = date.filter(|d| self.range.contains(*d)) {
            *self.days.entry(date).or_default() += 1;
        }
    }

    fn finish(self, total_override: Option<u64>) -> CountSummary {
        let by_date: Vec<DailyCount> = self
            .days
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();

        CountSummary {
            total: total_override.unwrap_or(self.total),
            in_range: by_date.iter().map(|d| d.count).sum(),
            by_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub range: DateRange,
    pub users: CountSummary,
    pub cards: CountSummary,
    /// `None` when Cloudinary is not configured or could not be queried
    pub cloudinary: Option<CountSummary>,
}

pub struct DashboardService {
    users: Arc<dyn UserStore>,
    cards: Arc<dyn CardStore>,
    cloudinary: Option<CloudinaryClient>,
}

impl DashboardService {
    pub fn new(users: Arc<dyn UserStore>, cards: Arc<dyn CardStore>, cloudinary: Option<CloudinaryClient>) -> Self {
        Self {
            users,
            cards,
            cloudinary,
        }
    }

    pub async fn stats(&self, range: DateRange) -> Result<DashboardStats, RepoError> {
        let (users, cards, cloudinary) = futures::join!(
            self.count_users(range),
            self.count_cards(range),
            self.count_hosted(range)
        );

        let cloudinary = match cloudinary {
            Some(Ok(summary)) => Some(summary),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Cloudinary stats unavailable");
                None
            }
            None => None,
        };

        Ok(DashboardStats {
            range,
            users: users?,
            cards: cards?,
            cloudinary,
        })
    }

    async fn count_users(&self, range: DateRange) -> Result<CountSummary, RepoError> {
        let mut tally = Tally::new(range);
        let mut cursor: Option<String> = None;

        loop {
            let page = self.users.list_users(SCAN_PAGE_SIZE, cursor.as_deref()).await?;
            for user in &page.items {
                tally.add(user.created_date());
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tally.finish(None))
    }

    async fn count_cards(&self, range: DateRange) -> Result<CountSummary, RepoError> {
        let mut tally = Tally::new(range);
        let mut cursor: Option<String> = None;

        loop {
            let page = self.cards.list_cards(SCAN_PAGE_SIZE, cursor.as_deref()).await?;
            for card in &page.items {
                tally.add(card.created_date());
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tally.finish(None))
    }

    async fn count_hosted(&self, range: DateRange) -> Option<Result<CountSummary, CloudinaryError>> {
        let cloudinary = self.cloudinary.as_ref()?;
        Some(count_hosted_with(cloudinary, range).await)
    }
}

async fn count_hosted_with(cloudinary: &CloudinaryClient, range: DateRange) -> Result<CountSummary, CloudinaryError> {
    let folder = cloudinary.generated_folder();
    let mut tally = Tally::new(range);
    let mut total_count = None;
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_SEARCH_PAGES {
        let page = cloudinary.search(folder, cursor.as_deref(), SEARCH_PAGE_SIZE).await?;
        total_count.get_or_insert(page.total_count);

        let mut passed_range = false;
        for resource in &page.resources {
            let date = resource.created_at.date_naive();
            if date < range.from {
                passed_range = true;
                continue;
            }
            tally.add(Some(date));
        }

        match page.next_cursor {
            Some(next) if !passed_range => cursor = Some(next),
            _ => break,
        }
    }

    Ok(tally.finish(total_count))
}

/// Today's UTC date
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudinaryConfig;
    use crate::db::{GeneratedCard, MemoryStore, UserProfile};
    use crate::utils::RetryPolicy;
    use chrono::DateTime;
    use serde_json::json;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ts(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let registrations = [
            ("a@example.com", "2024-12-24T08:00:00Z"),
            ("b@example.com", "2024-12-24T23:59:59Z"),
            ("c@example.com", "2024-12-26T10:00:00Z"),
            ("d@example.com", "2024-11-01T10:00:00Z"),
        ];
        for (email, at) in registrations {
            let profile = UserProfile {
                email: email.to_string(),
                name: "N".to_string(),
                phone: "1".to_string(),
                social_handle: None,
            };
            store.upsert_verified(&profile, ts(at)).await.unwrap();
        }

        store
            .insert_card(&GeneratedCard::new("https://x/1.png", ts("2024-12-25T12:00:00Z")))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_parse_range_defaults_to_thirty_days() {
        let range = DateRange::parse(None, None, day("2024-12-31")).unwrap();
        assert_eq!(range.from, day("2024-12-02"));
        assert_eq!(range.to, day("2024-12-31"));
        assert_eq!(range.days().count(), 30);
    }

    #[test]
    fn test_parse_range_rejects_bad_input() {
        let today = day("2024-12-31");
        assert!(DateRange::parse(Some("24/12/2024"), None, today).is_err());
        assert!(DateRange::parse(Some("2024-12-31"), Some("2024-12-01"), today).is_err());
        assert!(DateRange::parse(Some("2020-01-01"), Some("2024-01-01"), today).is_err());
    }

    #[test]
    fn test_parse_range_near_min_date_is_rejected() {
        let result = DateRange::parse(None, Some("-262143-01-05"), day("2024-12-31"));
        match result {
            Err(err) => assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST),
            Ok(range) => panic!("expected an error, got {:?}", range),
        }
    }

    #[tokio::test]
    async fn test_counts_by_date() {
        let store = seeded_store().await;
        let service = DashboardService::new(store.clone(), store, None);
        let range = DateRange::new(day("2024-12-24"), day("2024-12-26")).unwrap();

        let stats = service.stats(range).await.unwrap();

        assert_eq!(stats.users.total, 4);
        assert_eq!(stats.users.in_range, 3);
        assert_eq!(
            stats.users.by_date,
            vec![
                DailyCount { date: day("2024-12-24"), count: 2 },
                DailyCount { date: day("2024-12-25"), count: 0 },
                DailyCount { date: day("2024-12-26"), count: 1 },
            ]
        );
        assert_eq!(stats.cards.total, 1);
        assert_eq!(stats.cards.by_date[1].count, 1);
        assert!(stats.cloudinary.is_none());
    }

    fn cloudinary(base_url: String) -> CloudinaryClient {
        let config = CloudinaryConfig {
            cloud_name: "demo".to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            base_url,
            ..CloudinaryConfig::default()
        };
        CloudinaryClient::new(&config, RetryPolicy::none()).unwrap()
    }

    #[tokio::test]
    async fn test_cloudinary_failure_is_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1_1/demo/resources/search")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Invalid credentials"}}"#)
            .create_async()
            .await;

        let store = seeded_store().await;
        let service = DashboardService::new(store.clone(), store, Some(cloudinary(server.url())));
        let range = DateRange::new(day("2024-12-24"), day("2024-12-26")).unwrap();

        let stats = service.stats(range).await.unwrap();
        assert!(stats.cloudinary.is_none());
        assert_eq!(stats.users.in_range, 3);
    }

    #[tokio::test]
    async fn test_cloudinary_counts_stop_before_range() {
        let mut server = mockito::Server::new_async().await;
        let page = json!({
            "total_count": 40,
            "next_cursor": "more",
            "resources": [
                {"public_id": "a", "secure_url": "https://x/a", "created_at": "2024-12-26T09:00:00Z"},
                {"public_id": "b", "secure_url": "https://x/b", "created_at": "2024-12-24T09:00:00Z"},
                {"public_id": "c", "secure_url": "https://x/c", "created_at": "2024-12-24T08:00:00Z"},
                {"public_id": "d", "secure_url": "https://x/d", "created_at": "2024-12-20T08:00:00Z"}
            ]
        });
        let mock = server
            .mock("POST", "/v1_1/demo/resources/search")
            .with_body(page.to_string())
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let service = DashboardService::new(store.clone(), store, Some(cloudinary(server.url())));
        let range = DateRange::new(day("2024-12-24"), day("2024-12-26")).unwrap();

        let hosted = service.stats(range).await.unwrap().cloudinary.unwrap();
        mock.assert_async().await;

        assert_eq!(hosted.total, 40);
        assert_eq!(hosted.in_range, 3);
        assert_eq!(hosted.by_date[0].count, 2);
        assert_eq!(hosted.by_date[2].count, 1);
    }
}
