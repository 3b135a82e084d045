//! Mask derivation helpers.

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma};

use super::{MASK_MAX, MASK_MIN};

/// Single-channel mask from an image: its alpha channel when it has one,
/// otherwise its luminance.
#[must_use]
pub fn mask_from_image(image: &DynamicImage) -> GrayImage {
    if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            Luma([rgba.get_pixel(x, y)[3]])
        })
    } else {
        image.to_luma8()
    }
}

/// Hard mask: full weight strictly above `threshold`, nothing elsewhere.
#[must_use]
pub fn binarize(mask: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = mask.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > threshold { MASK_MAX } else { MASK_MIN };
    }
    out
}

/// Turn a depth map into an inpainting mask.
///
/// With `clean_cut` every pixel above `cut` becomes fully masked (a `cut` of 0
/// is treated as 128). Otherwise the depth range above `cut` is stretched back
/// to the full `0..=255` range so the mask stays soft.
#[must_use]
pub fn depth_to_mask(depth: &GrayImage, cut: u8, clean_cut: bool) -> GrayImage {
    let cut = if clean_cut && cut == 0 { 128 } else { cut };

    let mut out = depth.clone();
    for pixel in out.pixels_mut() {
        let value = pixel[0];
        pixel[0] = if value <= cut {
            MASK_MIN
        } else if clean_cut {
            MASK_MAX
        } else {
            remap(value, cut)
        };
    }
    out
}

/// Replace the alpha channel of `image` with `mask`, resized to fit.
#[must_use]
pub fn put_alpha(image: &DynamicImage, mask: &GrayImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    let resized;
    let alpha = if mask.dimensions() == (width, height) {
        mask
    } else {
        resized = imageops::resize(mask, width, height, FilterType::Triangle);
        &resized
    };

    let mut rgba = image.to_rgba8();
    for (pixel, value) in rgba.pixels_mut().zip(alpha.pixels()) {
        pixel[3] = value[0];
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Linear map of `value` from `[cut, 255]` to `[0, 255]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn remap(value: u8, cut: u8) -> u8 {
    let span = f32::from(MASK_MAX - cut);
    let scaled = f32::from(value - cut) / span * f32::from(MASK_MAX);
    scaled.clamp(0.0, 255.0) as u8
}
