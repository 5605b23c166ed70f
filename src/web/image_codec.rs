use super::error::ApiError;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Color modes the remover is known to handle without surprises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Rgb,
    Rgba,
    /// Anything else (grayscale, 16-bit, float, ...).
    Other(image::ColorType),
}

impl From<image::ColorType> for ColorMode {
    fn from(value: image::ColorType) -> Self {
        match value {
            image::ColorType::Rgb8 => ColorMode::Rgb,
            image::ColorType::Rgba8 => ColorMode::Rgba,
            other => ColorMode::Other(other),
        }
    }
}

/// Decodes uploaded bytes into an image.
///
/// The format is sniffed from the bytes; the declared media type is only used
/// when sniffing fails.
pub fn decode_input_image(
    file_data: &[u8],
    media_type: Option<&mime::Mime>,
) -> Result<DynamicImage, ApiError> {
    let hint = media_type.and_then(|m| ImageFormat::from_mime_type(m.essence_str()));

    let mut reader = ImageReader::new(Cursor::new(file_data));
    if let Some(format) = hint {
        reader.set_format(format);
    }
    let reader = reader.with_guessed_format().map_err(|e| {
        ApiError::InvalidInput(format!("Failed to read uploaded image: {}", e))
    })?;

    let format = reader.format();
    let image = reader.decode().map_err(|e| {
        ApiError::InvalidInput(format!(
            "Failed to decode image (format: {:?}): {}",
            format, e
        ))
    })?;

    debug!(
        "Decoded {:?} image: {}x{} {:?}",
        format,
        image.width(),
        image.height(),
        image.color()
    );

    Ok(image)
}

/// Converts anything that is not RGB8 or RGBA8 to RGB8.
///
/// This drops the alpha channel of e.g. LumaA or 16-bit RGBA inputs.
pub fn normalize_color_mode(image: DynamicImage) -> DynamicImage {
    match ColorMode::from(image.color()) {
        ColorMode::Rgb | ColorMode::Rgba => image,
        ColorMode::Other(color) => {
            debug!("Converting {:?} input to RGB8", color);
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
    }
}
