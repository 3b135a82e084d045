//! DeepDanbooru-style auto-tagging over ONNX Runtime.

use std::fs;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::generate::Captioner;
use crate::image::RGB_CHANNELS;
use crate::model::{load_session, tensor_data};

/// Input side length of the tagger network.
pub const TAGGER_SIZE: u32 = 512;

/// Default minimum score for a tag to be kept.
pub const DEFAULT_TAG_THRESHOLD: f32 = 0.5;

/// Captioner producing comma-separated booru tags.
pub struct OnnxTagger {
    session: Session,
    tags: Vec<String>,
    threshold: f32,
}

impl OnnxTagger {
    /// Load the model and its tag list (one tag per line, in output order).
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or the threshold is outside 0..=1.
    pub fn new(model_path: &Path, tags_path: &Path, threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::invalid("tag_threshold", "must be between 0.0 and 1.0"));
        }

        let tags = parse_tags(&fs::read_to_string(tags_path)?);
        tracing::info!("Loaded {} tags from {}", tags.len(), tags_path.display());

        Ok(Self {
            session: load_session(model_path)?,
            tags,
            threshold,
        })
    }
}

impl Captioner for OnnxTagger {
    fn caption(&mut self, image: &DynamicImage) -> Result<String> {
        let input = Tensor::from_array(tagger_input(image))
            .map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|source| Error::Inference { source })?;
        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "tag scores".to_string(),
                actual: "no output".to_string(),
            })?;
        let (_, scores) = tensor_data(&output)?;

        if scores.len() != self.tags.len() {
            return Err(Error::ShapeMismatch {
                expected: format!("{} tag scores", self.tags.len()),
                actual: scores.len().to_string(),
            });
        }

        Ok(select_tags(&self.tags, &scores, self.threshold))
    }
}

/// Non-empty trimmed lines.
#[must_use]
pub fn parse_tags(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// NHWC tensor in [0, 1] at the tagger's input size.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn tagger_input(image: &DynamicImage) -> Array4<f32> {
    let rgb = image
        .resize_exact(TAGGER_SIZE, TAGGER_SIZE, FilterType::Triangle)
        .to_rgb8();
    let side = TAGGER_SIZE as usize;
    Array4::from_shape_fn((1, side, side, RGB_CHANNELS), |(_, y, x, c)| {
        let pixel = rgb.get_pixel(x as u32, y as u32);
        f32::from(pixel[c]) / 255.0
    })
}

/// Tags scoring at least `threshold`, best first, as prompt text.
///
/// Rating tags are dropped; underscores become spaces and parentheses are
/// escaped so the tags read as literal prompt words.
#[must_use]
pub fn select_tags(tags: &[String], scores: &[f32], threshold: f32) -> String {
    let mut kept: Vec<(&str, f32)> = tags
        .iter()
        .zip(scores)
        .filter(|&(tag, score)| *score >= threshold && !tag.starts_with("rating:"))
        .map(|(tag, score)| (tag.as_str(), *score))
        .collect();
    kept.sort_by(|a, b| b.1.total_cmp(&a.1));

    kept.iter()
        .map(|(tag, _)| {
            tag.replace('_', " ")
                .replace('(', "\\(")
                .replace(')', "\\)")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
