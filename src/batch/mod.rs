//! Folder-level img2img: selection, masks, prompts, and the per-image loop.

mod prompt;
mod runner;
mod select;

use std::path::PathBuf;

pub use prompt::{join_prompt, split_tags, CaptionMemory, PromptList};
pub use runner::{BatchRunner, BatchSummary};
pub use select::{file_index, resolve_inputs, DirectoryIndex, FileKey, IndexMode};

use crate::error::{Error, Result};
use crate::generate::InpaintingFill;
use crate::image::Rotation;

/// Where each image's mask comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MaskSource {
    /// No mask; the whole image is regenerated.
    #[default]
    None,
    /// The input image's own alpha channel. Implies output alpha.
    Alpha,
    /// A file in this directory paired by index or stem.
    Directory(PathBuf),
    /// A depth estimate of the input image.
    Depth,
}

/// Two-pass refinement: a first pass at `size` and `strength`, whose output
/// feeds the regular pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopbackConfig {
    pub size: (u32, u32),
    pub strength: f32,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            size: (512, 512),
            strength: 0.2,
        }
    }
}

/// Depth-derived mask settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthMaskConfig {
    /// Depth values at or below this are unmasked; also the crop threshold.
    pub cut: u8,
    /// Turn the depth map into a hard black/white mask.
    pub clean_cut: bool,
    /// Estimate depth at the generation size instead of `net_size`.
    pub match_size: bool,
    pub net_size: (u32, u32),
    /// Force the request mask blur to 0.
    pub override_mask_blur: bool,
    /// Force inpainting to start from the original pixels.
    pub override_fill: bool,
}

impl Default for DepthMaskConfig {
    fn default() -> Self {
        Self {
            cut: 0,
            clean_cut: false,
            match_size: true,
            net_size: (384, 384),
            override_mask_blur: true,
            override_fill: true,
        }
    }
}

/// Generation settings shared by every image of the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub strength: f32,
    pub seed: Option<u64>,
    pub mask_blur: u32,
    pub inpainting_fill: InpaintingFill,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 512,
            height: 512,
            strength: 0.75,
            seed: None,
            mask_blur: 4,
            inpainting_fill: InpaintingFill::Original,
        }
    }
}

/// Configuration for one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub mask_source: MaskSource,
    /// Write the mask into the output's alpha channel.
    pub output_alpha: bool,
    /// Generate on the masked region only and paste it back.
    pub crop: bool,
    /// Context pixels kept around the masked region when cropping.
    pub crop_margin: u32,
    /// File and alpha masks are binarized above this value.
    pub alpha_threshold: u8,
    pub rotation: Rotation,
    /// Selection such as `"1-10, 15"`; all files when unset.
    pub selection: Option<String>,
    /// Reorder auto-captions against the previous image's tags.
    pub caption_carryover: bool,
    pub prompt_list: Option<PathBuf>,
    pub loopback: Option<LoopbackConfig>,
    pub depth: DepthMaskConfig,
    pub request: RequestSettings,
    /// JPEG quality (1-100).
    pub output_quality: u8,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            mask_source: MaskSource::None,
            output_alpha: false,
            crop: false,
            crop_margin: 32,
            alpha_threshold: 50,
            rotation: Rotation::None,
            selection: None,
            caption_carryover: false,
            prompt_list: None,
            loopback: None,
            depth: DepthMaskConfig::default(),
            request: RequestSettings::default(),
            output_quality: 95,
        }
    }
}

impl BatchConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        let request = &self.request;
        if request.width == 0 || request.height == 0 {
            return Err(Error::invalid("size", "width and height must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&request.strength) {
            return Err(Error::invalid("strength", "must be between 0.0 and 1.0"));
        }

        if let Some(loopback) = &self.loopback {
            if loopback.size.0 == 0 || loopback.size.1 == 0 {
                return Err(Error::invalid(
                    "firstpass_size",
                    "width and height must be greater than 0",
                ));
            }
            if !(0.0..=1.0).contains(&loopback.strength) {
                return Err(Error::invalid(
                    "firstpass_strength",
                    "must be between 0.0 and 1.0",
                ));
            }
        }

        if self.mask_source == MaskSource::Depth
            && !self.depth.match_size
            && (self.depth.net_size.0 == 0 || self.depth.net_size.1 == 0)
        {
            return Err(Error::invalid("net_size", "width and height must be greater than 0"));
        }

        if !(1..=100).contains(&self.output_quality) {
            return Err(Error::invalid("output_quality", "must be between 1 and 100"));
        }

        Ok(())
    }

    /// Whether outputs get the mask as alpha channel.
    #[must_use]
    pub fn writes_alpha(&self) -> bool {
        self.output_alpha || self.mask_source == MaskSource::Alpha
    }

    /// Threshold used to find the crop box for the active mask source.
    #[must_use]
    pub fn crop_threshold(&self) -> u8 {
        match self.mask_source {
            MaskSource::Depth => self.depth.cut,
            _ => self.alpha_threshold,
        }
    }
}
