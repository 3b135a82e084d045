//! The per-image loop.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::{DynamicImage, GrayImage};

use crate::error::{Error, Result};
use crate::generate::{
    Captioner, DepthEstimator, GenerationRequest, GenerationResult, Generator, InpaintingFill,
};
use crate::image::{load_image, save_image, ImageMetadata, PARAMETERS_KEY};
use crate::region::{
    binarize, crop, depth_to_mask, mask_from_image, put_alpha, restore, CropPolicy,
};

use super::prompt::{join_prompt, CaptionMemory, PromptList};
use super::select::{resolve_inputs, DirectoryIndex};
use super::{BatchConfig, MaskSource};

/// Metadata key recording the first pass of a loopback run.
///
/// The value holds the first-pass size and the first-pass strength, for
/// example `Firstpass size: 256x256, Firstpass strength: 0.3`. The main pass
/// strength is in the `parameters` entry.
pub const LOOPBACK_KEY: &str = "loopback_params";

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub selected: usize,
    pub generated: usize,
    /// Written unchanged because the mask was missing or blank.
    pub passed_through: usize,
    pub failed: usize,
    pub interrupted: bool,
}

enum Outcome {
    Generated,
    PassedThrough,
}

/// State carried from one image to the next.
struct LoopState {
    captions: CaptionMemory,
    prompts: Option<PromptList>,
    /// Images that reached generation so far.
    frame: usize,
}

/// Drives one batch: every selected input goes through masking, optional
/// cropping, generation, restoring, and saving.
///
/// Per-image failures are logged and skipped; only setup errors (unreadable
/// directories, an empty selection) abort the run.
pub struct BatchRunner<'a> {
    config: BatchConfig,
    generator: &'a mut dyn Generator,
    captioner: Option<&'a mut dyn Captioner>,
    depth: Option<&'a mut dyn DepthEstimator>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<'a> BatchRunner<'a> {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: BatchConfig, generator: &'a mut dyn Generator) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            generator,
            captioner: None,
            depth: None,
            cancel_flag: None,
        })
    }

    /// Prepend auto-captions to every prompt.
    #[must_use]
    pub fn with_captioner(mut self, captioner: &'a mut dyn Captioner) -> Self {
        self.captioner = Some(captioner);
        self
    }

    /// Estimator used when masks come from depth.
    #[must_use]
    pub fn with_depth_estimator(mut self, depth: &'a mut dyn DepthEstimator) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Stop between images once `flag` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every selected input.
    ///
    /// # Errors
    ///
    /// Returns an error if the input, mask or output directory cannot be used,
    /// the prompt list cannot be read, or the selection is empty.
    pub fn run(&mut self) -> Result<BatchSummary> {
        if self.config.mask_source == MaskSource::Depth && self.depth.is_none() {
            return Err(Error::invalid(
                "depth_estimator",
                "depth masks need a depth estimator",
            ));
        }

        let index = DirectoryIndex::scan(&self.config.input_dir)?;
        let inputs = resolve_inputs(&index, self.config.selection.as_deref())?;

        let masks = match &self.config.mask_source {
            MaskSource::Directory(dir) => Some(DirectoryIndex::scan(dir)?),
            _ => None,
        };

        let prompts = self
            .config
            .prompt_list
            .as_deref()
            .map(PromptList::from_path)
            .transpose()?;

        fs::create_dir_all(&self.config.output_dir)?;

        tracing::info!(
            "Will process {} files: {}",
            inputs.len(),
            inputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut state = LoopState {
            captions: CaptionMemory::new(),
            prompts,
            frame: 0,
        };
        let mut summary = BatchSummary {
            selected: inputs.len(),
            ..BatchSummary::default()
        };

        for (i, path) in inputs.iter().enumerate() {
            if self.is_cancelled() {
                tracing::warn!("Interrupted after {i} of {} files", inputs.len());
                summary.interrupted = true;
                break;
            }

            tracing::info!("[{}/{}] Processing: {}", i + 1, inputs.len(), path.display());

            match self.process(path, masks.as_ref(), &mut state) {
                Ok(Outcome::Generated) => summary.generated += 1,
                Ok(Outcome::PassedThrough) => summary.passed_through += 1,
                Err(err) => {
                    tracing::error!("Error processing {}: {err}", path.display());
                    tracing::debug!("{err:?}");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Batch complete: {} generated, {} passed through, {} failed",
            summary.generated,
            summary.passed_through,
            summary.failed
        );

        Ok(summary)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn process(
        &mut self,
        path: &Path,
        masks: Option<&DirectoryIndex>,
        state: &mut LoopState,
    ) -> Result<Outcome> {
        let file_name = path.file_name().ok_or_else(|| {
            Error::invalid("input", format!("{} has no file name", path.display()))
        })?;
        let output_path = self.config.output_dir.join(file_name);

        let original = load_image(path)?;
        let rotation = self.config.rotation;
        let image = rotation.apply(&original);

        let mask = match self.load_mask(path, &image, masks) {
            Ok(mask) => mask,
            Err(err @ (Error::MaskNotFound { .. } | Error::ImageLoad { .. })) => {
                return pass_through(path, &output_path, &err.to_string());
            }
            Err(err) => return Err(err),
        };

        let cropped = match &mask {
            Some(mask) if self.config.crop => {
                let policy = CropPolicy {
                    margin: self.config.crop_margin,
                    working: Some((self.config.request.width, self.config.request.height)),
                };
                match crop(&image, mask, self.config.crop_threshold(), &policy) {
                    Some(cropped) => Some(cropped),
                    None => {
                        return pass_through(
                            path,
                            &output_path,
                            &format!("mask of {} is blank", path.display()),
                        );
                    }
                }
            }
            _ => None,
        };

        let (work_image, work_mask) = match &cropped {
            Some(region) => (region.image.clone(), Some(region.mask.clone())),
            None => (image.clone(), mask.clone()),
        };

        let prompt = self.compose_prompt(&work_image, state)?;
        let request = self.build_request(work_image, work_mask, prompt);
        let result = self.generate(&request)?;
        state.frame += 1;

        let mut output = first_image(result.images)?;

        if let Some(cropped) = &cropped {
            output = restore(
                &image,
                &output,
                &cropped.image,
                &cropped.mask,
                &cropped.info,
                request.mask_blur + 1,
            );
        }

        if self.config.writes_alpha() {
            if let Some(mask) = &mask {
                output = put_alpha(&output, mask);
            }
        }

        let output = rotation.inverse().apply(&output);

        let mut metadata = ImageMetadata::new();
        if !result.info.is_empty() {
            metadata.insert(PARAMETERS_KEY, result.info);
        }
        if let Some(loopback) = &self.config.loopback {
            metadata.insert(
                LOOPBACK_KEY,
                format!(
                    "Firstpass size: {}x{}, Firstpass strength: {}",
                    loopback.size.0, loopback.size.1, loopback.strength
                ),
            );
        }

        save_image(&output, &output_path, &metadata, self.config.output_quality)?;
        tracing::info!("Saved {}", output_path.display());

        Ok(Outcome::Generated)
    }

    /// Mask for `image` (already rotated), or `None` when masking is off.
    fn load_mask(
        &mut self,
        path: &Path,
        image: &DynamicImage,
        masks: Option<&DirectoryIndex>,
    ) -> Result<Option<GrayImage>> {
        let threshold = self.config.alpha_threshold;

        match &self.config.mask_source {
            MaskSource::None => Ok(None),
            MaskSource::Alpha => {
                if !image.color().has_alpha() {
                    return Err(Error::MaskNotFound {
                        path: path.to_path_buf(),
                    });
                }
                Ok(Some(binarize(&mask_from_image(image), threshold)))
            }
            MaskSource::Directory(_) => {
                let mask_path = masks
                    .and_then(|m| m.find_for(path))
                    .ok_or_else(|| Error::MaskNotFound {
                        path: path.to_path_buf(),
                    })?;
                tracing::debug!("Using mask {}", mask_path.display());
                let mask = self.config.rotation.apply(&load_image(mask_path)?);
                Ok(Some(binarize(&mask_from_image(&mask), threshold)))
            }
            MaskSource::Depth => {
                let settings = self.config.depth;
                let (width, height) = if settings.match_size {
                    (self.config.request.width, self.config.request.height)
                } else {
                    settings.net_size
                };
                let estimator = self.depth.as_mut().ok_or_else(|| {
                    Error::invalid("depth_estimator", "depth masks need a depth estimator")
                })?;
                let depth = estimator.estimate(image, width, height)?;
                Ok(Some(depth_to_mask(&depth, settings.cut, settings.clean_cut)))
            }
        }
    }

    fn compose_prompt(&mut self, image: &DynamicImage, state: &mut LoopState) -> Result<String> {
        let mut prompt = self.config.request.prompt.clone();

        if let Some(captioner) = &mut self.captioner {
            let caption = captioner.caption(image)?;
            let caption = if self.config.caption_carryover {
                state.captions.carry_over(&caption)
            } else {
                caption
            };
            tracing::debug!("Caption: {caption}");
            prompt = join_prompt(&prompt, &caption);
        }

        if let Some(prompts) = &state.prompts {
            let entry = prompts.get(state.frame).ok_or_else(|| {
                Error::invalid(
                    "prompt_list",
                    format!(
                        "has {} entries, no prompt for image {}",
                        prompts.len(),
                        state.frame + 1
                    ),
                )
            })?;
            prompt = join_prompt(&prompt, entry);
        }

        Ok(prompt)
    }

    fn build_request(
        &self,
        init_image: DynamicImage,
        mask: Option<GrayImage>,
        prompt: String,
    ) -> GenerationRequest {
        let settings = &self.config.request;
        let depth_mode = self.config.mask_source == MaskSource::Depth;

        GenerationRequest {
            init_image,
            mask,
            width: settings.width,
            height: settings.height,
            strength: settings.strength,
            prompt,
            negative_prompt: settings.negative_prompt.clone(),
            seed: settings.seed,
            mask_blur: if depth_mode && self.config.depth.override_mask_blur {
                0
            } else {
                settings.mask_blur
            },
            inpainting_fill: if depth_mode && self.config.depth.override_fill {
                InpaintingFill::Original
            } else {
                settings.inpainting_fill
            },
        }
    }

    /// One generation, or two when loopback is on.
    fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        let Some(loopback) = self.config.loopback else {
            return self.generator.generate(request);
        };

        let first = self.generator.generate(&request.with_pass(
            request.init_image.clone(),
            loopback.size,
            loopback.strength,
        ))?;
        let first = first_image(first.images)?;
        tracing::debug!(
            "First pass done at {}x{}, refining at {}x{}",
            loopback.size.0,
            loopback.size.1,
            request.width,
            request.height
        );

        self.generator.generate(&request.with_pass(
            first,
            (request.width, request.height),
            request.strength,
        ))
    }
}

fn first_image(images: Vec<DynamicImage>) -> Result<DynamicImage> {
    images.into_iter().next().ok_or_else(|| Error::Generation {
        reason: "generator returned no image".to_string(),
    })
}

/// Write the input file unchanged to the output.
fn pass_through(input: &Path, output: &Path, reason: &str) -> Result<Outcome> {
    tracing::warn!("{reason}, output original image");
    if input != output {
        fs::copy(input, output)?;
    }
    Ok(Outcome::PassedThrough)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{DepthMaskConfig, LoopbackConfig, RequestSettings};
    use crate::image::Rotation;
    use image::{imageops::FilterType, GenericImageView, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::path::PathBuf;

    #[derive(Debug, Clone)]
    struct Call {
        size: (u32, u32),
        init_size: (u32, u32),
        strength: f32,
        has_mask: bool,
        mask_blur: u32,
        fill: InpaintingFill,
        prompt: String,
    }

    /// Records requests; returns the init image resized to the request, or a
    /// solid colour when `paint` is set.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        paint: Option<Rgb<u8>>,
    }

    impl Generator for Recorder {
        fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
            self.calls.push(Call {
                size: (request.width, request.height),
                init_size: request.init_image.dimensions(),
                strength: request.strength,
                has_mask: request.mask.is_some(),
                mask_blur: request.mask_blur,
                fill: request.inpainting_fill,
                prompt: request.prompt.clone(),
            });
            let image = match self.paint {
                Some(color) => DynamicImage::ImageRgb8(RgbImage::from_pixel(
                    request.width,
                    request.height,
                    color,
                )),
                None => request.init_image.resize_exact(
                    request.width,
                    request.height,
                    FilterType::Nearest,
                ),
            };
            Ok(GenerationResult {
                images: vec![image],
                info: format!("{}\nSize: {}x{}", request.prompt, request.width, request.height),
            })
        }
    }

    struct Tags(Vec<&'static str>);

    impl Captioner for Tags {
        fn caption(&mut self, _image: &DynamicImage) -> Result<String> {
            Ok(self.0.remove(0).to_string())
        }
    }

    /// Depth increasing left to right.
    struct Ramp;

    impl DepthEstimator for Ramp {
        fn estimate(&mut self, _image: &DynamicImage, width: u32, height: u32) -> Result<GrayImage> {
            Ok(GrayImage::from_fn(width, height, |x, _| {
                Luma([u8::try_from(x * 255 / width.max(1)).unwrap_or(255)])
            }))
        }
    }

    struct Dirs {
        _root: tempfile::TempDir,
        input: PathBuf,
        masks: PathBuf,
        output: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        let masks = root.path().join("masks");
        let output = root.path().join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&masks).unwrap();
        Dirs {
            _root: root,
            input,
            masks,
            output,
        }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 3) as u8, (y * 3) as u8, 80])
        }))
    }

    fn square_mask(width: u32, height: u32, from: u32, to: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            let inside = (from..to).contains(&x) && (from..to).contains(&y);
            Luma([if inside { 255 } else { 0 }])
        }))
    }

    fn config(dirs: &Dirs) -> BatchConfig {
        BatchConfig {
            input_dir: dirs.input.clone(),
            output_dir: dirs.output.clone(),
            request: RequestSettings {
                width: 32,
                height: 32,
                ..RequestSettings::default()
            },
            ..BatchConfig::default()
        }
    }

    #[test]
    fn test_blank_mask_passes_original_through() {
        let dirs = dirs();
        gradient(32, 32).save(dirs.input.join("1.png")).unwrap();
        square_mask(32, 32, 0, 0).save(dirs.masks.join("1.png")).unwrap();

        let mut recorder = Recorder::default();
        let summary = {
            let config = BatchConfig {
                mask_source: MaskSource::Directory(dirs.masks.clone()),
                crop: true,
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder).unwrap().run().unwrap()
        };

        assert!(recorder.calls.is_empty());
        assert_eq!(summary.passed_through, 1);
        assert_eq!(
            fs::read(dirs.output.join("1.png")).unwrap(),
            fs::read(dirs.input.join("1.png")).unwrap()
        );
    }

    #[test]
    fn test_missing_mask_does_not_stop_batch() {
        let dirs = dirs();
        gradient(32, 32).save(dirs.input.join("1.png")).unwrap();
        gradient(32, 32).save(dirs.input.join("2.png")).unwrap();
        square_mask(32, 32, 8, 24).save(dirs.masks.join("2.png")).unwrap();

        let mut recorder = Recorder::default();
        let summary = {
            let config = BatchConfig {
                mask_source: MaskSource::Directory(dirs.masks.clone()),
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder).unwrap().run().unwrap()
        };

        assert_eq!(summary.passed_through, 1);
        assert_eq!(summary.generated, 1);
        assert_eq!(recorder.calls.len(), 1);
        assert!(recorder.calls[0].has_mask);
        assert!(dirs.output.join("1.png").exists());
        assert!(dirs.output.join("2.png").exists());
    }

    #[test]
    fn test_crop_generates_on_region_and_restores_full_image() {
        let dirs = dirs();
        let source = gradient(96, 64);
        source.save(dirs.input.join("1.png")).unwrap();
        square_mask(96, 64, 40, 56).save(dirs.masks.join("1.png")).unwrap();

        let mut recorder = Recorder {
            paint: Some(Rgb([255, 0, 255])),
            ..Recorder::default()
        };
        let summary = {
            let config = BatchConfig {
                mask_source: MaskSource::Directory(dirs.masks.clone()),
                crop: true,
                crop_margin: 4,
                request: RequestSettings {
                    width: 32,
                    height: 32,
                    mask_blur: 0,
                    ..RequestSettings::default()
                },
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder).unwrap().run().unwrap()
        };
        assert_eq!(summary.generated, 1);

        let call = &recorder.calls[0];
        assert_eq!(call.size, (32, 32));
        assert_eq!(call.init_size, (24, 24));

        let out = image::open(dirs.output.join("1.png")).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (96, 64));
        assert_eq!(out.get_pixel(48, 48), &Rgb([255, 0, 255]));
        assert_eq!(out.get_pixel(2, 2), source.to_rgb8().get_pixel(2, 2));
        assert_eq!(out.get_pixel(90, 10), source.to_rgb8().get_pixel(90, 10));
    }

    #[test]
    fn test_loopback_runs_two_passes() {
        let dirs = dirs();
        gradient(64, 48).save(dirs.input.join("1.png")).unwrap();

        let mut recorder = Recorder::default();
        {
            let config = BatchConfig {
                loopback: Some(LoopbackConfig {
                    size: (256, 256),
                    strength: 0.3,
                }),
                request: RequestSettings {
                    width: 512,
                    height: 512,
                    strength: 0.6,
                    ..RequestSettings::default()
                },
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder).unwrap().run().unwrap();
        }

        assert_eq!(recorder.calls.len(), 2);
        assert_eq!(recorder.calls[0].size, (256, 256));
        assert_eq!(recorder.calls[0].init_size, (64, 48));
        assert!((recorder.calls[0].strength - 0.3).abs() < f32::EPSILON);
        assert_eq!(recorder.calls[1].size, (512, 512));
        assert_eq!(recorder.calls[1].init_size, (256, 256));
        assert!((recorder.calls[1].strength - 0.6).abs() < f32::EPSILON);

        let path = dirs.output.join("1.png");
        assert_eq!(image::open(&path).unwrap().dimensions(), (512, 512));

        let reader = png::Decoder::new(fs::File::open(&path).unwrap())
            .read_info()
            .unwrap();
        let loopback = reader
            .info()
            .uncompressed_latin1_text
            .iter()
            .find(|t| t.keyword == LOOPBACK_KEY)
            .map(|t| t.text.clone());
        assert_eq!(
            loopback.as_deref(),
            Some("Firstpass size: 256x256, Firstpass strength: 0.3")
        );
    }

    #[test]
    fn test_rotation_round_trip_keeps_orientation_and_alpha() {
        let dirs = dirs();
        let source = DynamicImage::ImageRgba8(RgbaImage::from_fn(40, 20, |x, _| {
            Rgba([10, 20, 30, if x < 10 { 255 } else { 0 }])
        }));
        source.save(dirs.input.join("1.png")).unwrap();

        let mut recorder = Recorder {
            paint: Some(Rgb([200, 200, 200])),
            ..Recorder::default()
        };
        {
            let config = BatchConfig {
                mask_source: MaskSource::Alpha,
                crop: true,
                crop_margin: 0,
                rotation: Rotation::Clockwise90,
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder).unwrap().run().unwrap();
        }

        // Rotated frame is 20x40; the opaque strip becomes its top 10 rows.
        assert_eq!(recorder.calls[0].init_size.0, 20);

        let out = image::open(dirs.output.join("1.png")).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (40, 20));
        assert_eq!(out.get_pixel(2, 10)[3], 255);
        assert_eq!(out.get_pixel(30, 10)[3], 0);
    }

    #[test]
    fn test_empty_selection_aborts_before_processing() {
        let dirs = dirs();
        gradient(8, 8).save(dirs.input.join("1.png")).unwrap();

        let mut recorder = Recorder::default();
        let result = {
            let config = BatchConfig {
                selection: Some("5-9".to_string()),
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder).unwrap().run()
        };

        assert!(matches!(result, Err(Error::EmptySelection { .. })));
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_captions_and_prompt_list_feed_prompt() {
        let dirs = dirs();
        gradient(8, 8).save(dirs.input.join("1.png")).unwrap();
        gradient(8, 8).save(dirs.input.join("2.png")).unwrap();
        let list = dirs.masks.join("prompts.csv");
        fs::write(&list, "first scene\nsecond scene\n").unwrap();

        let mut recorder = Recorder::default();
        let mut tags = Tags(vec!["1girl, smile", "hat, 1girl"]);
        {
            let config = BatchConfig {
                caption_carryover: true,
                prompt_list: Some(list),
                request: RequestSettings {
                    prompt: "masterpiece".to_string(),
                    width: 8,
                    height: 8,
                    ..RequestSettings::default()
                },
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder)
                .unwrap()
                .with_captioner(&mut tags)
                .run()
                .unwrap();
        }

        assert_eq!(recorder.calls[0].prompt, "masterpiece, 1girl, smile, first scene");
        assert_eq!(recorder.calls[1].prompt, "masterpiece, 1girl, hat, second scene");
    }

    #[test]
    fn test_depth_mask_overrides_request() {
        let dirs = dirs();
        gradient(16, 16).save(dirs.input.join("a.png")).unwrap();

        let mut recorder = Recorder::default();
        let mut ramp = Ramp;
        {
            let config = BatchConfig {
                mask_source: MaskSource::Depth,
                depth: DepthMaskConfig {
                    cut: 100,
                    ..DepthMaskConfig::default()
                },
                ..config(&dirs)
            };
            BatchRunner::new(config, &mut recorder)
                .unwrap()
                .with_depth_estimator(&mut ramp)
                .run()
                .unwrap();
        }

        let call = &recorder.calls[0];
        assert!(call.has_mask);
        assert_eq!(call.mask_blur, 0);
        assert_eq!(call.fill, InpaintingFill::Original);
    }

    #[test]
    fn test_depth_without_estimator_is_rejected() {
        let dirs = dirs();
        let mut recorder = Recorder::default();
        let config = BatchConfig {
            mask_source: MaskSource::Depth,
            ..config(&dirs)
        };
        let result = BatchRunner::new(config, &mut recorder).unwrap().run();
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_unreadable_input_is_skipped() {
        let dirs = dirs();
        fs::write(dirs.input.join("1.png"), b"not a png").unwrap();
        gradient(8, 8).save(dirs.input.join("2.png")).unwrap();

        let mut recorder = Recorder::default();
        let summary = BatchRunner::new(config(&dirs), &mut recorder)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.generated, 1);
        assert!(!dirs.output.join("1.png").exists());
        assert!(dirs.output.join("2.png").exists());
    }

    #[test]
    fn test_cancel_flag_stops_before_next_image() {
        let dirs = dirs();
        gradient(8, 8).save(dirs.input.join("1.png")).unwrap();

        let mut recorder = Recorder::default();
        let flag = Arc::new(AtomicBool::new(true));
        let summary = BatchRunner::new(config(&dirs), &mut recorder)
            .unwrap()
            .with_cancel_flag(flag)
            .run()
            .unwrap();

        assert!(summary.interrupted);
        assert!(recorder.calls.is_empty());
    }
}
