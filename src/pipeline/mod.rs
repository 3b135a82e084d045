//! ONNX Stable Diffusion img2img backend.

mod diffusion;
mod fill;
mod guidance;
mod vae;

pub use diffusion::{format_info, working_size, Config, DiffusionGenerator};
