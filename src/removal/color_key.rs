use super::{BackgroundRemover, RemovalError};
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

pub const DEFAULT_TOLERANCE: u8 = 24;

/// Model-free remover that treats the dominant border colour as background.
///
/// The mean colour of the outermost pixel ring is taken as the background, and
/// every pixel within `tolerance` (Euclidean RGB distance) of it is made fully
/// transparent. Only suited to product shots on flat backdrops; gradients and
/// textured scenes need the segmentation model.
#[derive(Debug, Clone, Copy)]
pub struct ColorKeyRemover {
    tolerance: u8,
}

impl ColorKeyRemover {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }
}

impl Default for ColorKeyRemover {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl BackgroundRemover for ColorKeyRemover {
    fn remove(&self, image: &DynamicImage) -> Result<DynamicImage, RemovalError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RemovalError::new(format!(
                "cannot remove background from a {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let mut rgba = image.to_rgba8();
        let key = border_mean(&rgba);
        let max_dist_sq = u32::from(self.tolerance).pow(2);

        let mut cleared = 0usize;
        for pixel in rgba.pixels_mut() {
            if distance_sq(pixel, key) <= max_dist_sq {
                pixel[3] = 0;
                cleared += 1;
            }
        }

        debug!(
            "Color key {:?} cleared {} of {} pixels",
            key,
            cleared,
            rgba.width() as usize * rgba.height() as usize
        );

        Ok(DynamicImage::ImageRgba8(rgba))
    }
}

fn border_mean(image: &RgbaImage) -> [u8; 3] {
    let (w, h) = image.dimensions();
    let mut sum = [0u64; 3];
    let mut count = 0u64;

    let mut add = |pixel: &Rgba<u8>| {
        for (acc, channel) in sum.iter_mut().zip(pixel.0.iter()) {
            *acc += u64::from(*channel);
        }
        count += 1;
    };

    for x in 0..w {
        add(image.get_pixel(x, 0));
        if h > 1 {
            add(image.get_pixel(x, h - 1));
        }
    }
    for y in 1..h.saturating_sub(1) {
        add(image.get_pixel(0, y));
        if w > 1 {
            add(image.get_pixel(w - 1, y));
        }
    }

    sum.map(|channel| (channel / count.max(1)) as u8)
}

fn distance_sq(pixel: &Rgba<u8>, key: [u8; 3]) -> u32 {
    pixel.0[..3]
        .iter()
        .zip(key)
        .map(|(&a, b)| {
            let d = i32::from(a) - i32::from(b);
            (d * d) as u32
        })
        .sum()
}
