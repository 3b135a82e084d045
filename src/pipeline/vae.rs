//! VAE encode/decode between image tensors and SD latents.

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::image::{ImageTensor, SD_SIZE_STEP};
use crate::model::tensor_data;

/// Latent tensor (1, 4, H/8, W/8).
pub type LatentTensor = Array4<f32>;

/// VAE scaling factor (from Stable Diffusion).
const VAE_SCALE: f32 = 0.18215;

/// Latent (height, width) for an image of `width` x `height`.
#[must_use]
pub const fn latent_dims(width: u32, height: u32) -> (usize, usize) {
    (
        (height / SD_SIZE_STEP) as usize,
        (width / SD_SIZE_STEP) as usize,
    )
}

/// Encode an NCHW image tensor in [-1, 1] to scaled latents.
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn encode(encoder: &mut Session, image: &ImageTensor) -> Result<LatentTensor> {
    let input = Tensor::from_array(image.clone()).map_err(|source| Error::Inference { source })?;

    let outputs = encoder
        .run(ort::inputs![input])
        .map_err(|source| Error::Inference { source })?;

    let output = outputs
        .values()
        .next()
        .ok_or_else(|| Error::ShapeMismatch {
            expected: "latent_sample output".to_string(),
            actual: "no output".to_string(),
        })?;

    Ok(extract_array4(&output)? * VAE_SCALE)
}

/// Decode scaled latents back to an NCHW image tensor in [-1, 1].
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn decode(decoder: &mut Session, latent: &LatentTensor) -> Result<ImageTensor> {
    let input = Tensor::from_array(latent / VAE_SCALE).map_err(|source| Error::Inference { source })?;

    let outputs = decoder
        .run(ort::inputs![input])
        .map_err(|source| Error::Inference { source })?;

    let output = outputs
        .values()
        .next()
        .ok_or_else(|| Error::ShapeMismatch {
            expected: "sample output".to_string(),
            actual: "no output".to_string(),
        })?;

    extract_array4(&output)
}

/// Reshape a model output into a 4D array.
pub(super) fn extract_array4(value: &ort::value::ValueRef<'_>) -> Result<Array4<f32>> {
    let (dims, data) = tensor_data(value)?;

    let [n, c, h, w] = dims[..] else {
        return Err(Error::ShapeMismatch {
            expected: "4D tensor".to_string(),
            actual: format!("{}D tensor", dims.len()),
        });
    };

    Array4::from_shape_vec((n, c, h, w), data).map_err(|_| Error::ShapeMismatch {
        expected: format!("{dims:?}"),
        actual: "reshape failed".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latent_dims() {
        assert_eq!(latent_dims(512, 512), (64, 64));
        assert_eq!(latent_dims(768, 512), (64, 96));
    }
}
