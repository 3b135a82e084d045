//! Edge guidance: keep strong structure from the init image.

use image::{GrayImage, Luma};
use imageproc::edges::canny;
use ndarray::Array4;

use crate::image::ImageTensor;

/// Edge map tensor (1, 1, H, W) with values in [0, 1].
pub type EdgeTensor = Array4<f32>;

/// Canny edges of an NCHW image tensor in [-1, 1].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn extract_edges(image: &ImageTensor, low_threshold: f32, high_threshold: f32) -> EdgeTensor {
    let (_, _, height, width) = image.dim();

    let gray = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let channel = |c: usize| (image[[0, c, y, x]] + 1.0) * 127.5;
        // Rec. 601 luma
        let luma = 0.299_f32
            .mul_add(channel(0), 0.587_f32.mul_add(channel(1), 0.114 * channel(2)))
            .clamp(0.0, 255.0) as u8;
        Luma([luma])
    });

    let edges = canny(&gray, low_threshold, high_threshold);

    Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
        f32::from(edges.get_pixel(x as u32, y as u32)[0]) / 255.0
    })
}

/// Pull `regenerated` towards `original` where `edges` is set.
///
/// `edge_strength` of 0 returns `regenerated` unchanged.
pub fn blend_with_edges(
    original: &ImageTensor,
    regenerated: &ImageTensor,
    edges: &EdgeTensor,
    edge_strength: f32,
) -> ImageTensor {
    Array4::from_shape_fn(regenerated.dim(), |(n, c, y, x)| {
        let weight = edges[[0, 0, y, x]] * edge_strength;
        original[[n, c, y, x]].mul_add(weight, regenerated[[n, c, y, x]] * (1.0 - weight))
    })
}
