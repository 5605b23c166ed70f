use axum::{
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header},
};
use tracing::{debug, warn};

use super::{
    error::ApiError,
    models::{UPLOAD_FIELD_NAME, Upload},
};

/// Pulls the image upload out of a `multipart/form-data` request.
///
/// The declared content type of the `file` field is checked before its body is
/// read, so non-image uploads are rejected without buffering them.
pub async fn extract_request_image(request: Request) -> Result<Upload, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !content_type.starts_with("multipart/form-data") {
        return Err(ApiError::InvalidInput(format!(
            "Content-Type '{}' is not supported. Expected multipart/form-data with a '{}' field.",
            content_type, UPLOAD_FIELD_NAME
        )));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::InvalidInput(format!("Failed to process multipart request: {}", e)))?;

    let mut upload_opt: Option<Upload> = None;
    let mut ignored_fields = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to process multipart field", e))?
    {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            let field_name = field.name().unwrap_or("unnamed").to_string();
            debug!("Ignoring multipart field: {}", field_name);
            ignored_fields += 1;
            continue;
        }

        if upload_opt.is_some() {
            warn!("Multiple 'file' fields found in multipart request, using the last one");
        }

        let media_type = validate_image_content_type(field.content_type())?;
        let filename = field.file_name().map(str::to_string);
        debug!(
            "Received file {:?} with content type: {}",
            filename, media_type
        );

        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read file data", e))?;

        if data.is_empty() {
            return Err(ApiError::InvalidInput(
                "Uploaded 'file' field is empty.".to_string(),
            ));
        }

        upload_opt = Some(Upload {
            data,
            media_type,
            filename,
        });
    }

    if ignored_fields > 0 {
        debug!(
            "Ignored {} non-file fields in multipart request",
            ignored_fields
        );
    }

    upload_opt.ok_or_else(|| {
        ApiError::InvalidInput("Missing 'file' field in multipart request.".to_string())
    })
}

fn multipart_error(context: &str, error: MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("{}: {}", context, error.body_text()))
    } else {
        ApiError::InvalidInput(format!("{}: {}", context, error.body_text()))
    }
}

fn validate_image_content_type(content_type: Option<&str>) -> Result<mime::Mime, ApiError> {
    let content_type = content_type
        .ok_or_else(|| ApiError::InvalidInput("File must be an image".to_string()))?;

    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidInput(format!(
            "File must be an image (invalid content type '{}')",
            content_type
        ))
    })?;

    if media_type.type_() != mime::IMAGE {
        return Err(ApiError::InvalidInput(format!(
            "File must be an image (got '{}')",
            media_type
        )));
    }

    Ok(media_type)
}
