//! MiDaS-style monocular depth over ONNX Runtime.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::generate::DepthEstimator;
use crate::image::RGB_CHANNELS;
use crate::model::{load_session, tensor_data};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Depth estimator backed by a MiDaS-style ONNX model.
///
/// The model sees the image at `net_size`; the relative inverse depth it
/// returns is stretched to 0..255 so that near is bright.
pub struct OnnxDepth {
    session: Session,
    net_size: (u32, u32),
    invert: bool,
}

impl OnnxDepth {
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or `net_size` is empty.
    pub fn new(model_path: &Path, net_size: (u32, u32)) -> Result<Self> {
        if net_size.0 == 0 || net_size.1 == 0 {
            return Err(Error::invalid("net_size", "width and height must be greater than 0"));
        }
        Ok(Self {
            session: load_session(model_path)?,
            net_size,
            invert: false,
        })
    }

    /// Make far bright instead of near.
    #[must_use]
    pub const fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }
}

impl DepthEstimator for OnnxDepth {
    fn estimate(&mut self, image: &DynamicImage, width: u32, height: u32) -> Result<GrayImage> {
        let (net_w, net_h) = self.net_size;
        let input = Tensor::from_array(depth_input(image, net_w, net_h))
            .map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|source| Error::Inference { source })?;
        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "depth output".to_string(),
                actual: "no output".to_string(),
            })?;
        let (dims, data) = tensor_data(&output)?;

        // (1, H, W) or (1, 1, H, W)
        let (out_h, out_w) = match dims[..] {
            [.., h, w] if h * w == data.len() => (h, w),
            _ => {
                return Err(Error::ShapeMismatch {
                    expected: "(1, H, W) depth map".to_string(),
                    actual: format!("{dims:?}"),
                })
            }
        };

        let depth = normalize_depth(&data, out_w, out_h, self.invert)?;
        tracing::debug!("Depth map {out_w}x{out_h} -> {width}x{height}");

        Ok(if depth.dimensions() == (width, height) {
            depth
        } else {
            image::imageops::resize(&depth, width, height, FilterType::Triangle)
        })
    }
}

/// ImageNet-normalized NCHW tensor at `width` x `height`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn depth_input(image: &DynamicImage, width: u32, height: u32) -> Array4<f32> {
    let rgb = image
        .resize_exact(width, height, FilterType::CatmullRom)
        .to_rgb8();
    Array4::from_shape_fn(
        (1, RGB_CHANNELS, height as usize, width as usize),
        |(_, c, y, x)| {
            let v = f32::from(rgb.get_pixel(x as u32, y as u32)[c]) / 255.0;
            (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
        },
    )
}

/// Stretch raw depth values to 0..255.
///
/// A constant map becomes black.
///
/// # Errors
///
/// Returns an error if `data` does not hold `width * height` values.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn normalize_depth(data: &[f32], width: usize, height: usize, invert: bool) -> Result<GrayImage> {
    if data.len() != width * height {
        return Err(Error::ShapeMismatch {
            expected: format!("{width}x{height} values"),
            actual: data.len().to_string(),
        });
    }

    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    Ok(GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = data[y as usize * width + x as usize];
        let unit = if range > f32::EPSILON { (v - min) / range } else { 0.0 };
        let unit = if invert { 1.0 - unit } else { unit };
        Luma([(unit * 255.0).round().clamp(0.0, 255.0) as u8])
    }))
}
