//! Aspect-preserving downscaling of captured frames.

use image::imageops::FilterType;
use image::DynamicImage;

/// Size that fits inside `max_dimension` on both edges, keeping aspect ratio.
///
/// Images already within bounds keep their size.
pub fn target_size(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    if width >= height {
        let scaled = ((height as f64) * (max_dimension as f64) / (width as f64)).round() as u32;
        (max_dimension, scaled.max(1))
    } else {
        let scaled = ((width as f64) * (max_dimension as f64) / (height as f64)).round() as u32;
        (scaled.max(1), max_dimension)
    }
}

pub fn downscale(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (target_width, target_height) = target_size(width, height, max_dimension);

    if target_width == width && target_height == height {
        image
    } else {
        image.resize_exact(target_width, target_height, FilterType::Lanczos3)
    }
}
