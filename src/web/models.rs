// Request-side data models for the web server

use axum::body::Bytes;

/// Multipart field carrying the image.
pub const UPLOAD_FIELD_NAME: &str = "file";

/// Prefix of the filename suggested for the processed image.
pub const PROCESSED_FILENAME_PREFIX: &str = "processed_";

/// An image upload that passed content-type validation but is not decoded yet.
#[derive(Debug, Clone)]
pub struct Upload {
    pub data: Bytes,
    pub media_type: mime::Mime,
    pub filename: Option<String>,
}

impl Upload {
    /// Filename hint for the response: `processed_<stem>.png`.
    ///
    /// Directory components are stripped. Only ASCII letters, digits, space and
    /// `-_.` are kept; everything else becomes `_`, so the name can never close
    /// the quoted `filename` parameter or add parameters of its own.
    pub fn processed_filename(&self) -> String {
        let original = self
            .filename
            .as_deref()
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
            .unwrap_or("image");

        let stem = match original.rfind('.') {
            Some(dot) if dot > 0 => &original[..dot],
            _ => original,
        };

        let sanitized: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        format!("{}{}.png", PROCESSED_FILENAME_PREFIX, sanitized)
    }
}
