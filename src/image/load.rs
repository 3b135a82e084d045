//! Image loading utilities.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageTensor, RGB_CHANNELS};

/// Load an image from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();

    image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert a `DynamicImage` to a normalized NCHW tensor.
///
/// The image is:
/// 1. Resized to `width` x `height` (skipped when it already has that size)
/// 2. Converted to RGB if necessary
/// 3. Normalized to [-1, 1] range
/// 4. Returned as NCHW tensor (1, 3, height, width)
#[must_use]
pub fn image_to_tensor(img: &DynamicImage, width: u32, height: u32) -> ImageTensor {
    let rgb = if (img.width(), img.height()) == (width, height) {
        img.to_rgb8()
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3).to_rgb8()
    };

    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        // Normalize from [0, 255] to [-1, 1]
        tensor[[0, 0, y, x]] = (f32::from(pixel[0]) / 127.5) - 1.0;
        tensor[[0, 1, y, x]] = (f32::from(pixel[1]) / 127.5) - 1.0;
        tensor[[0, 2, y, x]] = (f32::from(pixel[2]) / 127.5) - 1.0;
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape() {
        let img = DynamicImage::new_rgb8(100, 100);
        let tensor = image_to_tensor(&img, 256, 128);

        assert_eq!(tensor.shape(), &[1, 3, 128, 256]);
    }

    #[test]
    fn test_normalization_range() {
        let img = DynamicImage::new_rgb8(100, 100);
        let tensor = image_to_tensor(&img, 64, 64);

        let min = tensor.iter().copied().fold(f32::INFINITY, f32::min);
        let max = tensor.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        // Black image should be all -1.0
        assert!((min - (-1.0)).abs() < 0.01);
        assert!((max - (-1.0)).abs() < 0.01);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = load_image("does/not/exist.png").unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }
}
