//! # regionbatch
//!
//! Batch img2img over a folder of images, with optional per-image masks.
//!
//! Each selected input is rotated, masked (from its alpha channel, a mask
//! folder, or a depth estimate), optionally cropped to the masked region at
//! the generation aspect ratio, regenerated, pasted back, and saved with its
//! generation parameters. Inputs whose mask is missing or blank are copied to
//! the output unchanged.
//!
//! ## Example
//!
//! ```no_run
//! use regionbatch::{BatchConfig, BatchRunner, Config, DiffusionGenerator, MaskSource, ModelCache};
//!
//! # fn main() -> regionbatch::Result<()> {
//! let mut generator = DiffusionGenerator::new(Config::default(), &ModelCache::new()?)?;
//!
//! let config = BatchConfig {
//!     input_dir: "frames".into(),
//!     output_dir: "out".into(),
//!     mask_source: MaskSource::Directory("masks".into()),
//!     crop: true,
//!     ..BatchConfig::default()
//! };
//! let summary = BatchRunner::new(config, &mut generator)?.run()?;
//! println!("{} generated", summary.generated);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod depth;
pub mod error;
pub mod generate;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod region;
pub mod tagger;

pub use batch::{
    BatchConfig, BatchRunner, BatchSummary, DepthMaskConfig, LoopbackConfig, MaskSource,
    RequestSettings,
};
pub use depth::OnnxDepth;
pub use error::{Error, Result};
pub use generate::{
    Captioner, DepthEstimator, GenerationRequest, GenerationResult, Generator, InpaintingFill,
};
pub use model::ModelCache;
pub use pipeline::{Config, DiffusionGenerator};
pub use region::{CropInfo, CropPolicy, CroppedRegion, Rect};
pub use tagger::OnnxTagger;
