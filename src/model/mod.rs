//! ONNX model loading and output extraction.

mod loader;

pub use loader::{load_session, ModelCache, ModelType};

use crate::error::{Error, Result};

/// Shape and data of an `f32` model output.
///
/// # Errors
///
/// Returns an error if the value is not an `f32` tensor.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub(crate) fn tensor_data(value: &ort::value::ValueRef<'_>) -> Result<(Vec<usize>, Vec<f32>)> {
    let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Dimensions of a materialized output are never negative.
    let dims = shape.iter().map(|&d| d as usize).collect();
    Ok((dims, data.to_vec()))
}
