//! Compositing a generated patch back into its source image.

use image::{
    imageops, imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Rgba, RgbaImage,
};
use imageproc::filter::gaussian_blur_f32;

use super::CropInfo;
use crate::image::with_color_of;

/// Blur `mask` so it fades out over roughly `radius` pixels.
///
/// A radius of 0 returns the mask unchanged.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn feather(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    gaussian_blur_f32(mask, radius as f32)
}

/// Paste `generated` back into `original` at the region recorded in `info`.
///
/// `generated` is resized to the region size, then blended over `source` (the
/// pre-generation content of the region) with the feathered `mask` as weight.
/// The result keeps the size and colour type of `original`.
#[must_use]
pub fn restore(
    original: &DynamicImage,
    generated: &DynamicImage,
    source: &DynamicImage,
    mask: &GrayImage,
    info: &CropInfo,
    blur_radius: u32,
) -> DynamicImage {
    let region = info.region;
    let (width, height) = (region.width(), region.height());

    let generated = fit_rgba(generated, width, height);
    let source = fit_rgba(source, width, height);
    let weights = if mask.dimensions() == (width, height) {
        feather(mask, blur_radius)
    } else {
        feather(
            &imageops::resize(mask, width, height, FilterType::Nearest),
            blur_radius,
        )
    };

    let patch = RgbaImage::from_fn(width, height, |x, y| {
        let weight = weights.get_pixel(x, y)[0];
        blend(*generated.get_pixel(x, y), *source.get_pixel(x, y), weight)
    });

    let mut canvas = original.to_rgba8();
    imageops::replace(
        &mut canvas,
        &patch,
        i64::from(region.left),
        i64::from(region.top),
    );

    tracing::debug!(
        "restored {}x{} patch at {region} with blur {blur_radius}",
        width,
        height
    );

    with_color_of(canvas, original)
}

fn fit_rgba(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        image.to_rgba8()
    } else {
        image
            .resize_exact(width, height, FilterType::Lanczos3)
            .to_rgba8()
    }
}

/// Integer alpha blend; weight 0 yields `back`, 255 yields `front`.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn blend(front: Rgba<u8>, back: Rgba<u8>, weight: u8) -> Rgba<u8> {
    let w = u32::from(weight);
    let mix = |f: u8, b: u8| ((u32::from(f) * w + u32::from(b) * (255 - w) + 127) / 255) as u8;
    Rgba([
        mix(front[0], back[0]),
        mix(front[1], back[1]),
        mix(front[2], back[2]),
        mix(front[3], back[3]),
    ])
}
