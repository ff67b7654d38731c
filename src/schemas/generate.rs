//! Postcard generation request body

use serde::Deserialize;
use validator::Validate;

use crate::error::ApiError;
use crate::services::pipeline::PostcardRequest;
use crate::utils::non_empty;

/// `POST /api/generate` body.
///
/// Image URLs are optional here so a missing one can be reported by name.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(url(message = "must be an absolute URL"))]
    #[serde(default, alias = "userImageUrl")]
    pub user_image_url: Option<String>,

    #[validate(url(message = "must be an absolute URL"))]
    #[serde(default, alias = "dishImageUrl")]
    pub dish_image_url: Option<String>,

    #[validate(url(message = "must be an absolute URL"))]
    #[serde(default, alias = "backgroundImageUrl")]
    pub background_image_url: Option<String>,

    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,

    #[validate(length(max = 100))]
    #[serde(default)]
    pub dish: Option<String>,

    #[validate(length(max = 100))]
    #[serde(default)]
    pub background: Option<String>,

    #[validate(length(max = 500))]
    #[serde(default)]
    pub greeting: Option<String>,
}

impl GenerateRequest {
    /// Check required fields and formats, producing the pipeline input
    pub fn into_postcard(self) -> Result<PostcardRequest, ApiError> {
        let request = Self {
            user_image_url: non_empty(self.user_image_url.as_deref()),
            dish_image_url: non_empty(self.dish_image_url.as_deref()),
            background_image_url: non_empty(self.background_image_url.as_deref()),
            email: non_empty(self.email.as_deref()),
            dish: non_empty(self.dish.as_deref()),
            background: non_empty(self.background.as_deref()),
            greeting: non_empty(self.greeting.as_deref()),
        };

        let missing: Vec<&str> = [
            ("user_image_url", &request.user_image_url),
            ("dish_image_url", &request.dish_image_url),
            ("background_image_url", &request.background_image_url),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(ApiError::bad_request(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        request.validate()?;

        Ok(PostcardRequest {
            user_image_url: request.user_image_url.unwrap_or_default(),
            dish_image_url: request.dish_image_url.unwrap_or_default(),
            background_image_url: request.background_image_url.unwrap_or_default(),
            email: request.email,
            dish: request.dish,
            background: request.background,
            greeting: request.greeting,
        })
    }
}
