//! Mask-driven region extraction and restoration.
//!
//! A batch item that is "zoomed in" on its mask goes through [`crop`] before
//! generation and [`restore`] after it. The [`CropInfo`] produced by the first
//! call is everything the second needs to put the generated patch back at the
//! right place and size.

mod crop;
mod mask;
mod restore;

pub use crop::{bounding_box, crop, CropInfo, CropPolicy, CroppedRegion};
pub use mask::{binarize, depth_to_mask, mask_from_image, put_alpha};
pub use restore::{feather, restore};
pub(crate) use restore::blend;

/// Mask value for pixels left untouched.
pub const MASK_MIN: u8 = 0;

/// Mask value for pixels fully replaced.
pub const MASK_MAX: u8 = u8::MAX;

/// Half-open pixel rectangle `[left, right) x [top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    /// Rectangle covering a whole `width` x `height` raster.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.right - self.left
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.bottom - self.top
    }

    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Whether `other` lies entirely inside `self`.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width(),
            self.height(),
            self.left,
            self.top
        )
    }
}
