//! Bounding-box extraction around the active part of a mask.

use std::borrow::Cow;

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, GrayImage};

use super::Rect;

/// How the tight bounding box is grown before extraction.
///
/// The box is first grown by `margin` pixels on every side. When `working` is
/// set, the shorter side is then grown so the box has the working aspect ratio.
/// Finally the size is clamped to the image and the box is shifted to fit,
/// keeping its centre where possible. Growth never shrinks the tight box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropPolicy {
    /// Context pixels added around the masked area.
    pub margin: u32,

    /// Resolution the patch will be generated at.
    pub working: Option<(u32, u32)>,
}

/// Geometry of one extracted region, consumed by [`super::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropInfo {
    /// Size of the source image the region was taken from.
    pub source_size: (u32, u32),

    /// Tight box around the pixels above the threshold.
    pub tight: Rect,

    /// Padded box that was actually extracted.
    pub region: Rect,

    /// Size the patch is generated at.
    pub working: (u32, u32),
}

impl CropInfo {
    /// Horizontal and vertical factors from region pixels to working pixels.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scale(&self) -> (f32, f32) {
        (
            self.working.0 as f32 / self.region.width() as f32,
            self.working.1 as f32 / self.region.height() as f32,
        )
    }
}

/// Sub-rasters of an image and its mask, plus the geometry to put them back.
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    pub image: DynamicImage,
    pub mask: GrayImage,
    pub info: CropInfo,
}

/// Tight box around every mask pixel strictly above `threshold`.
///
/// Returns `None` when no pixel qualifies.
#[must_use]
pub fn bounding_box(mask: &GrayImage, threshold: u8) -> Option<Rect> {
    let mut found: Option<Rect> = None;

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] <= threshold {
            continue;
        }
        let rect = found.get_or_insert(Rect {
            left: x,
            top: y,
            right: x + 1,
            bottom: y + 1,
        });
        rect.left = rect.left.min(x);
        rect.top = rect.top.min(y);
        rect.right = rect.right.max(x + 1);
        rect.bottom = rect.bottom.max(y + 1);
    }

    found
}

/// Extract the region of `image` selected by `mask`.
///
/// The mask is resized to the image with nearest-neighbour sampling when the
/// sizes differ. Returns `None` for a blank mask (nothing above `threshold`);
/// callers pass the image through untouched in that case.
#[must_use]
pub fn crop(
    image: &DynamicImage,
    mask: &GrayImage,
    threshold: u8,
    policy: &CropPolicy,
) -> Option<CroppedRegion> {
    let (width, height) = image.dimensions();

    let mask: Cow<'_, GrayImage> = if mask.dimensions() == (width, height) {
        Cow::Borrowed(mask)
    } else {
        Cow::Owned(imageops::resize(mask, width, height, FilterType::Nearest))
    };

    let tight = bounding_box(&mask, threshold)?;
    let region = expand(tight, width, height, policy);

    tracing::debug!("mask box {tight} expanded to {region} in {width}x{height}");

    let cropped_image = image.crop_imm(region.left, region.top, region.width(), region.height());
    let cropped_mask = imageops::crop_imm(
        &*mask,
        region.left,
        region.top,
        region.width(),
        region.height(),
    )
    .to_image();

    Some(CroppedRegion {
        image: cropped_image,
        mask: cropped_mask,
        info: CropInfo {
            source_size: (width, height),
            tight,
            region,
            working: policy
                .working
                .unwrap_or((region.width(), region.height())),
        },
    })
}

/// Grow `tight` per `policy` and fit it inside a `width` x `height` image.
fn expand(tight: Rect, width: u32, height: u32, policy: &CropPolicy) -> Rect {
    let margin = Rect {
        left: tight.left.saturating_sub(policy.margin),
        top: tight.top.saturating_sub(policy.margin),
        right: tight.right.saturating_add(policy.margin).min(width),
        bottom: tight.bottom.saturating_add(policy.margin).min(height),
    };

    let (mut w, mut h) = (margin.width(), margin.height());
    if let Some((ww, wh)) = policy.working.filter(|&(ww, wh)| ww > 0 && wh > 0) {
        (w, h) = fit_aspect(w, h, ww, wh);
    }
    let (w, h) = (w.min(width), h.min(height));

    let left = centered_start(margin.left, margin.right, w, width);
    let top = centered_start(margin.top, margin.bottom, h, height);

    Rect {
        left,
        top,
        right: left + w,
        bottom: top + h,
    }
}

/// Grow the shorter side of `w` x `h` until it matches the `ww:wh` ratio.
#[allow(clippy::cast_possible_truncation)]
fn fit_aspect(w: u32, h: u32, ww: u32, wh: u32) -> (u32, u32) {
    let (w64, h64, ww, wh) = (u64::from(w), u64::from(h), u64::from(ww), u64::from(wh));

    if w64 * wh < h64 * ww {
        let grown = (h64 * ww).div_ceil(wh);
        (grown.min(u64::from(u32::MAX)) as u32, h)
    } else {
        let grown = (w64 * wh).div_ceil(ww);
        (w, grown.min(u64::from(u32::MAX)) as u32)
    }
}

/// Start of a span of `len` centred on `[start, end)` and kept inside `[0, limit)`.
fn centered_start(start: u32, end: u32, len: u32, limit: u32) -> u32 {
    let centre_twice = u64::from(start) + u64::from(end);
    let wanted = centre_twice.saturating_sub(u64::from(len)) / 2;
    let wanted = u32::try_from(wanted).unwrap_or(u32::MAX);
    wanted.min(limit - len)
}
