// Runs one background removal and persists the result as an optimized PNG artifact.

use crate::{
    removal::{BackgroundRemover, RemovalError},
    temp_files::{Artifact, TempFileManager},
};
use image::{
    DynamicImage,
    codecs::png::{CompressionType, FilterType, PngEncoder},
};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
};
use tracing::debug;

#[derive(Debug)]
pub enum ProcessingError {
    /// No artifact file could be created.
    Allocate(io::Error),
    /// The remover rejected or failed on the image.
    Removal(RemovalError),
    /// PNG encoding failed.
    Encode(image::ImageError),
    /// Writing the artifact to disk failed.
    Write(io::Error),
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingError::Allocate(err) => write!(f, "failed to allocate output file: {}", err),
            ProcessingError::Removal(err) => write!(f, "background removal failed: {}", err),
            ProcessingError::Encode(err) => write!(f, "PNG encoding failed: {}", err),
            ProcessingError::Write(err) => write!(f, "failed to write output file: {}", err),
        }
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessingError::Allocate(err) => Some(err),
            ProcessingError::Removal(err) => Some(err),
            ProcessingError::Encode(err) => Some(err),
            ProcessingError::Write(err) => Some(err),
        }
    }
}

/// Removes the background of `image` and saves it to a fresh artifact.
///
/// On any failure the artifact is deleted before the error is returned, so a
/// failed call leaves nothing behind in the temp directory. Blocking; run it on
/// a blocking thread.
pub fn process_image(
    remover: &dyn BackgroundRemover,
    temp_files: &TempFileManager,
    image: &DynamicImage,
) -> Result<Artifact, ProcessingError> {
    let artifact = temp_files.allocate().map_err(ProcessingError::Allocate)?;

    match remove_and_save(remover, image, &artifact) {
        Ok(()) => Ok(artifact),
        Err(err) => {
            artifact.discard();
            Err(err)
        }
    }
}

fn remove_and_save(
    remover: &dyn BackgroundRemover,
    image: &DynamicImage,
    artifact: &Artifact,
) -> Result<(), ProcessingError> {
    let output = remover.remove(image).map_err(ProcessingError::Removal)?;
    debug!(
        "Background removed: {}x{} -> {}x{} {:?}",
        image.width(),
        image.height(),
        output.width(),
        output.height(),
        output.color()
    );

    let file = File::create(artifact.path()).map_err(ProcessingError::Write)?;
    let mut writer = BufWriter::new(file);
    let encoder =
        PngEncoder::new_with_quality(&mut writer, CompressionType::Best, FilterType::Adaptive);
    output
        .write_with_encoder(encoder)
        .map_err(ProcessingError::Encode)?;
    writer.flush().map_err(ProcessingError::Write)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        removal::{ColorKeyRemover, fakes::FailingRemover},
        temp_files::count_artifacts,
    };
    use image::{GenericImageView, RgbaImage};

    fn sample_rgba() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(32, 24, |x, y| {
            if (8..24).contains(&x) && (6..18).contains(&y) {
                image::Rgba([10, 120, 240, 255])
            } else {
                image::Rgba([250, 250, 250, 255])
            }
        }))
    }

    #[test]
    fn test_success_writes_decodable_png_with_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = TempFileManager::new(dir.path()).unwrap();

        let artifact = process_image(&ColorKeyRemover::default(), &temp_files, &sample_rgba()).unwrap();
        assert_eq!(count_artifacts(dir.path()), 1);

        let bytes = std::fs::read(artifact.path()).unwrap();
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Png
        );
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.dimensions(), (32, 24));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(16, 12)[3], 255);

        drop(artifact);
        assert_eq!(count_artifacts(dir.path()), 0);
    }

    #[test]
    fn test_removal_failure_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = TempFileManager::new(dir.path()).unwrap();

        let err = process_image(&FailingRemover, &temp_files, &sample_rgba()).unwrap_err();

        assert!(matches!(err, ProcessingError::Removal(_)));
        assert!(err.to_string().contains("model exploded"));
        assert_eq!(count_artifacts(dir.path()), 0);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = TempFileManager::new(dir.path().join("gone")).unwrap();
        std::fs::remove_dir_all(temp_files.dir()).unwrap();

        let err = process_image(&ColorKeyRemover::default(), &temp_files, &sample_rgba())
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Allocate(_)));
    }
}
