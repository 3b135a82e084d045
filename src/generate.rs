//! Contracts for the models the batch loop drives.
//!
//! The batch loop never talks to a concrete model. It builds an immutable
//! [`GenerationRequest`] per pass and hands it to a [`Generator`]; auto-captions
//! come from a [`Captioner`] and depth masks from a [`DepthEstimator`].

use image::{DynamicImage, GrayImage};

use crate::error::Result;

/// What to do with the masked area before denoising starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InpaintingFill {
    /// Blur the surrounding colours into the masked area.
    Fill,
    /// Start from the original pixels.
    #[default]
    Original,
    /// Replace the masked latents with noise.
    LatentNoise,
    /// Zero the masked latents.
    LatentNothing,
}

/// One img2img call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub init_image: DynamicImage,
    pub mask: Option<GrayImage>,
    pub width: u32,
    pub height: u32,
    /// Denoising strength (0.0-1.0).
    pub strength: f32,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: Option<u64>,
    /// Blur applied to the mask edge by the generator.
    pub mask_blur: u32,
    pub inpainting_fill: InpaintingFill,
}

impl GenerationRequest {
    /// Same request at another size and strength, starting from `init_image`.
    #[must_use]
    pub fn with_pass(&self, init_image: DynamicImage, size: (u32, u32), strength: f32) -> Self {
        Self {
            init_image,
            width: size.0,
            height: size.1,
            strength,
            ..self.clone()
        }
    }
}

/// Output of one img2img call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub images: Vec<DynamicImage>,
    /// Human-readable generation parameters, stored with the output file.
    pub info: String,
}

/// Image-to-image generation backend.
pub trait Generator {
    /// Run one generation pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult>;
}

/// Auto-tagger producing a comma-separated tag list.
pub trait Captioner {
    /// # Errors
    ///
    /// Returns an error if the model fails.
    fn caption(&mut self, image: &DynamicImage) -> Result<String>;
}

/// Monocular depth estimator.
pub trait DepthEstimator {
    /// Depth of `image` as a grayscale raster of `width` x `height`, brighter is nearer.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails.
    fn estimate(&mut self, image: &DynamicImage, width: u32, height: u32) -> Result<GrayImage>;
}
