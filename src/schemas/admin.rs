//! Admin and upload query/response types

use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 100))]
    pub username: String,

    #[validate(length(min = 1, max = 200))]
    pub password: String,
}

/// `?limit=&cursor=` for paginated listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl PageQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudinaryResourcesQuery {
    pub cursor: Option<String>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignatureQuery {
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub public_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_limits() {
        assert_eq!(PageQuery::default().limit(), DEFAULT_PAGE_SIZE);
        let big = PageQuery {
            limit: Some(10_000),
            cursor: Some(" ".to_string()),
        };
        assert_eq!(big.limit(), MAX_PAGE_SIZE);
        assert_eq!(big.cursor(), None);
        let zero = PageQuery {
            limit: Some(0),
            cursor: None,
        };
        assert_eq!(zero.limit(), 1);
    }
}
