//! `regionbatch` CLI - batch img2img with mask-driven crop and restore.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use regionbatch::image::Rotation;
use regionbatch::tagger::DEFAULT_TAG_THRESHOLD;
use regionbatch::{
    BatchConfig, BatchRunner, Config, DepthMaskConfig, DiffusionGenerator, InpaintingFill,
    LoopbackConfig, MaskSource, ModelCache, OnnxDepth, OnnxTagger, RequestSettings,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Fill {
    Fill,
    Original,
    LatentNoise,
    LatentNothing,
}

impl From<Fill> for InpaintingFill {
    fn from(fill: Fill) -> Self {
        match fill {
            Fill::Fill => Self::Fill,
            Fill::Original => Self::Original,
            Fill::LatentNoise => Self::LatentNoise,
            Fill::LatentNothing => Self::LatentNothing,
        }
    }
}

/// Run img2img over a folder, optionally only inside per-image masks.
#[derive(Parser, Debug)]
#[command(name = "regionbatch")]
#[command(version, about, long_about = None)]
struct Args {
    /// Folder of input images.
    #[arg(value_name = "INPUT_DIR")]
    input: PathBuf,

    /// Folder for outputs (same file names as the inputs).
    #[arg(value_name = "OUTPUT_DIR")]
    output: PathBuf,

    /// Folder of masks paired with inputs by index or file stem.
    #[arg(long, value_name = "DIR", conflicts_with_all = ["alpha_mask", "depth_model"])]
    mask_dir: Option<PathBuf>,

    /// Use each input's alpha channel as its mask (implies --output-alpha).
    #[arg(long, conflicts_with = "depth_model")]
    alpha_mask: bool,

    /// MiDaS-style ONNX model used to derive masks from depth.
    #[arg(long, value_name = "FILE")]
    depth_model: Option<PathBuf>,

    /// Write the mask into the output's alpha channel.
    #[arg(long)]
    output_alpha: bool,

    /// Generate on the masked region only and paste it back.
    #[arg(long)]
    crop: bool,

    /// Context pixels kept around the masked region when cropping.
    #[arg(long, default_value = "32", value_name = "PX")]
    crop_margin: u32,

    /// Mask values above this count as masked.
    #[arg(long, default_value = "50", value_name = "0-255")]
    alpha_threshold: u8,

    /// Rotate inputs before processing (0, 90, 180, -90); outputs are rotated back.
    #[arg(long, default_value = "0", value_parser = parse_rotation, allow_hyphen_values = true)]
    rotate: Rotation,

    /// Files to process, e.g. "1-10, 15, cover.png". All files when omitted.
    #[arg(long, value_name = "LIST")]
    select: Option<String>,

    #[arg(short, long, default_value = "")]
    prompt: String,

    #[arg(short, long, default_value = "")]
    negative_prompt: String,

    /// Generation size.
    #[arg(long, default_value = "512x512", value_parser = parse_size, value_name = "WxH")]
    size: (u32, u32),

    /// Denoising strength (0.0-1.0).
    #[arg(short, long, default_value = "0.75", value_name = "FLOAT")]
    strength: f32,

    /// Number of denoising steps at strength 1.0.
    #[arg(long, default_value = "20", value_name = "INT")]
    steps: u32,

    /// Random seed for reproducibility.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Blur of the mask edge, in pixels.
    #[arg(long, default_value = "4", value_name = "PX")]
    mask_blur: u32,

    /// Content the masked area starts from.
    #[arg(long, value_enum, default_value = "original")]
    fill: Fill,

    /// DeepDanbooru-style ONNX tagger whose tags are appended to the prompt.
    #[arg(long, value_name = "FILE", requires = "tagger_tags")]
    tagger_model: Option<PathBuf>,

    /// Tag list of the tagger model, one per line.
    #[arg(long, value_name = "FILE")]
    tagger_tags: Option<PathBuf>,

    /// Minimum tagger score.
    #[arg(long, default_value_t = DEFAULT_TAG_THRESHOLD, value_name = "FLOAT")]
    tag_threshold: f32,

    /// Put tags shared with the previous image first.
    #[arg(long, requires = "tagger_model")]
    carryover: bool,

    /// Headerless CSV; row N is appended to the prompt of the N-th generated image.
    #[arg(long, value_name = "FILE")]
    prompt_list: Option<PathBuf>,

    /// Run a first pass at --firstpass-size and feed it into the main pass.
    #[arg(long)]
    loopback: bool,

    #[arg(long, default_value = "512x512", value_parser = parse_size, value_name = "WxH")]
    firstpass_size: (u32, u32),

    #[arg(long, default_value = "0.2", value_name = "FLOAT")]
    firstpass_strength: f32,

    /// Depth values at or below this are not masked.
    #[arg(long, default_value = "0", value_name = "0-255")]
    depth_cut: u8,

    /// Turn the depth map into a hard mask.
    #[arg(long)]
    depth_clean_cut: bool,

    /// Make far bright instead of near.
    #[arg(long)]
    depth_invert: bool,

    /// Depth network input size; the generation size is used when omitted.
    #[arg(long, value_parser = parse_size, value_name = "WxH")]
    depth_net_size: Option<(u32, u32)>,

    /// Keep --mask-blur and --fill in depth mode instead of forcing 0 and original.
    #[arg(long)]
    depth_keep_request: bool,

    /// Directory for downloaded diffusion models.
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Disable spatial guidance (edge preservation).
    #[arg(long)]
    no_guidance: bool,

    /// Output JPEG/WebP quality (1-100).
    #[arg(short, long, default_value = "95", value_name = "INT")]
    quality: u8,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_rotation(s: &str) -> std::result::Result<Rotation, String> {
    s.parse().map_err(|e: regionbatch::Error| e.to_string())
}

fn parse_size(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {s}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("bad size {s}: {e}"))
    };
    Ok((parse(w)?, parse(h)?))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("regionbatch={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every selected image was written.
fn run(args: &Args) -> Result<bool> {
    if !args.input.is_dir() {
        anyhow::bail!("Input directory does not exist: {}", args.input.display());
    }

    let mask_source = match (&args.mask_dir, args.alpha_mask, &args.depth_model) {
        (Some(dir), _, _) => MaskSource::Directory(dir.clone()),
        (None, true, _) => MaskSource::Alpha,
        (None, false, Some(_)) => MaskSource::Depth,
        (None, false, None) => MaskSource::None,
    };

    let config = BatchConfig {
        input_dir: args.input.clone(),
        output_dir: args.output.clone(),
        mask_source,
        output_alpha: args.output_alpha,
        crop: args.crop,
        crop_margin: args.crop_margin,
        alpha_threshold: args.alpha_threshold,
        rotation: args.rotate,
        selection: args.select.clone(),
        caption_carryover: args.carryover,
        prompt_list: args.prompt_list.clone(),
        loopback: args.loopback.then_some(LoopbackConfig {
            size: args.firstpass_size,
            strength: args.firstpass_strength,
        }),
        depth: DepthMaskConfig {
            cut: args.depth_cut,
            clean_cut: args.depth_clean_cut,
            match_size: args.depth_net_size.is_none(),
            net_size: args.depth_net_size.unwrap_or(args.size),
            override_mask_blur: !args.depth_keep_request,
            override_fill: !args.depth_keep_request,
        },
        request: RequestSettings {
            prompt: args.prompt.clone(),
            negative_prompt: args.negative_prompt.clone(),
            width: args.size.0,
            height: args.size.1,
            strength: args.strength,
            seed: args.seed,
            mask_blur: args.mask_blur,
            inpainting_fill: args.fill.into(),
        },
        output_quality: args.quality,
    };
    config.validate().context("Invalid configuration")?;

    let cache = match &args.model_dir {
        Some(dir) => ModelCache::with_dir(dir.clone()),
        None => ModelCache::new(),
    }
    .context("Failed to prepare model cache")?;

    let generator_config = Config {
        num_steps: args.steps,
        use_guidance: !args.no_guidance,
        ..Config::default()
    };
    let mut generator =
        DiffusionGenerator::new(generator_config, &cache).context("Failed to initialize generator")?;

    let mut tagger = match (&args.tagger_model, &args.tagger_tags) {
        (Some(model), Some(tags)) => Some(
            OnnxTagger::new(model, tags, args.tag_threshold).context("Failed to load tagger")?,
        ),
        _ => None,
    };

    let mut depth = match &args.depth_model {
        Some(model) => {
            let net_size = config.depth.net_size;
            Some(
                OnnxDepth::new(model, net_size)
                    .context("Failed to load depth model")?
                    .with_invert(args.depth_invert),
            )
        }
        None => None,
    };

    let mut runner = BatchRunner::new(config, &mut generator)?;
    if let Some(tagger) = tagger.as_mut() {
        runner = runner.with_captioner(tagger);
    }
    if let Some(depth) = depth.as_mut() {
        runner = runner.with_depth_estimator(depth);
    }

    let summary = runner.run().context("Batch failed")?;

    println!(
        "{} generated, {} passed through, {} failed ({} selected) -> {}",
        summary.generated,
        summary.passed_through,
        summary.failed,
        summary.selected,
        args.output.display()
    );

    Ok(summary.failed == 0 && !summary.interrupted)
}
