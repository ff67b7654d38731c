//! Photo upload endpoints
//!
//! Either the server uploads the photo to Cloudinary (`/api/upload`) or the
//! browser uploads directly with a signature issued here.

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use chrono::Utc;

use crate::error::ApiError;
use crate::schemas::{SignatureQuery, UploadResponse};
use crate::server::state::AppState;
use crate::services::images::{extension_for, is_image_content_type};
use crate::services::{CloudinaryClient, ImageBytes, SignedUpload, UploadSource};

fn cloudinary(state: &AppState) -> Result<&CloudinaryClient, ApiError> {
    state
        .cloudinary
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Image hosting is not configured".to_string()))
}

/// Upload a photo (multipart field `file`)
///
/// POST /api/upload
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let cloudinary = cloudinary(&state)?;
    let max_bytes = state.settings.max_upload_bytes;

    let mut image: Option<ImageBytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read multipart field");
        ApiError::bad_request(format!("Invalid multipart body: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_default();
        if !is_image_content_type(&content_type) {
            return Err(ApiError::bad_request("Only image uploads are accepted"));
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("upload.{}", extension_for(&content_type)));

        let data = field.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to read upload body");
            ApiError::bad_request("Upload could not be read (is it over the size limit?)")
        })?;

        if data.len() > max_bytes {
            return Err(ApiError::bad_request(format!(
                "Image is larger than {} bytes",
                max_bytes
            )));
        }

        image = Some(ImageBytes::new(data.to_vec(), content_type, filename));
        break;
    }

    let image = image.ok_or_else(|| ApiError::bad_request("Missing multipart field `file`"))?;
    if image.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    tracing::info!(bytes = image.len(), content_type = %image.content_type, "Uploading photo");

    let folder = cloudinary.upload_folder().to_string();
    let asset = cloudinary
        .upload(UploadSource::Bytes(image), &folder)
        .await
        .map_err(|e| ApiError::upstream("Cloudinary", e.to_string()))?;

    Ok(Json(UploadResponse {
        url: asset.secure_url,
        public_id: asset.public_id,
    }))
}

/// Signature for a direct browser upload
///
/// GET /api/cloudinary-signature?folder=
pub async fn cloudinary_signature(
    State(state): State<AppState>,
    Query(query): Query<SignatureQuery>,
) -> Result<Json<SignedUpload>, ApiError> {
    let cloudinary = cloudinary(&state)?;
    let folder = resolve_folder(cloudinary.upload_folder(), query.folder.as_deref())?;

    Ok(Json(cloudinary.signed_upload(&folder, Utc::now().timestamp())))
}

/// Requested folder, restricted to the upload folder and its subfolders
fn resolve_folder(base: &str, requested: Option<&str>) -> Result<String, ApiError> {
    let requested = requested.map(|f| f.trim().trim_matches('/')).filter(|f| !f.is_empty());

    let Some(folder) = requested else {
        return Ok(base.to_string());
    };

    let allowed_chars = folder
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_'));
    let inside_base = folder == base || folder.starts_with(&format!("{}/", base));

    if !allowed_chars || folder.contains("//") || !inside_base {
        return Err(ApiError::bad_request(format!(
            "Folder must be `{}` or one of its subfolders",
            base
        )));
    }

    Ok(folder.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_folder() {
        let base = "postcards/uploads";
        assert_eq!(resolve_folder(base, None).unwrap(), base);
        assert_eq!(resolve_folder(base, Some(" ")).unwrap(), base);
        assert_eq!(
            resolve_folder(base, Some("postcards/uploads/2024")).unwrap(),
            "postcards/uploads/2024"
        );
        assert!(resolve_folder(base, Some("postcards/generated")).is_err());
        assert!(resolve_folder(base, Some("postcards/uploads/../generated")).is_err());
        assert!(resolve_folder(base, Some("postcards/uploads-evil")).is_err());
    }
}
