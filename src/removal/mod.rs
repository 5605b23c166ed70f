// Background removal capability.
//
// `ImglyRemover` runs a segmentation model; `ColorKeyRemover` is a model-free
// fallback. The pipeline only depends on the `BackgroundRemover` trait.

mod color_key;
mod imgly;

pub use color_key::{ColorKeyRemover, DEFAULT_TOLERANCE};
pub use imgly::ImglyRemover;

use image::DynamicImage;

/// Turns an image into one whose background pixels are transparent.
///
/// Called from a blocking thread; implementations may be CPU heavy.
pub trait BackgroundRemover: Send + Sync {
    fn remove(&self, image: &DynamicImage) -> Result<DynamicImage, RemovalError>;
}

/// Failure reported by a `BackgroundRemover`.
#[derive(Debug)]
pub struct RemovalError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RemovalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl std::fmt::Display for RemovalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemovalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Always fails, as a crashed model would.
    pub struct FailingRemover;

    impl BackgroundRemover for FailingRemover {
        fn remove(&self, _image: &DynamicImage) -> Result<DynamicImage, RemovalError> {
            Err(RemovalError::new("model exploded"))
        }
    }

    /// Sleeps while tracking how many calls overlap.
    #[derive(Default)]
    pub struct SlowCountingRemover {
        pub delay: Duration,
        pub active: AtomicUsize,
        pub max_active: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl SlowCountingRemover {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    impl BackgroundRemover for SlowCountingRemover {
        fn remove(&self, image: &DynamicImage) -> Result<DynamicImage, RemovalError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DynamicImage::ImageRgba8(image.to_rgba8()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_removal_error_display_includes_source() {
        let io = std::io::Error::other("disk gone");
        let err = RemovalError::with_source("model load failed", io);

        assert_eq!(err.to_string(), "model load failed: disk gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_removal_error_without_source() {
        let err = RemovalError::new("bad input");
        assert_eq!(err.to_string(), "bad input");
        assert!(err.source().is_none());
    }
}
