//! Image loading, rotation, tensor conversion, and saving with metadata.

mod load;
mod metadata;
mod save;

use std::str::FromStr;

pub use load::{image_to_tensor, load_image};
pub use metadata::{exif_user_comment, insert_jpeg_exif, insert_webp_exif};
pub use save::{save_image, tensor_to_image, ImageMetadata, PARAMETERS_KEY};

use image::{DynamicImage, RgbaImage};
use ndarray::Array4;

use crate::error::Error;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [-1, 1] range for diffusion model compatibility.
pub type ImageTensor = Array4<f32>;

/// Latent and image sizes must be multiples of this.
pub const SD_SIZE_STEP: u32 = 8;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;

/// Clockwise rotation applied to inputs before processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Half,
    CounterClockwise90,
}

impl Rotation {
    /// Rotate `image` by this amount.
    #[must_use]
    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Self::None => image.clone(),
            Self::Clockwise90 => image.rotate90(),
            Self::Half => image.rotate180(),
            Self::CounterClockwise90 => image.rotate270(),
        }
    }

    /// The rotation that undoes this one.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Clockwise90 => Self::CounterClockwise90,
            Self::Half => Self::Half,
            Self::CounterClockwise90 => Self::Clockwise90,
        }
    }

    #[must_use]
    pub const fn degrees(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Clockwise90 => 90,
            Self::Half => 180,
            Self::CounterClockwise90 => -90,
        }
    }
}

impl FromStr for Rotation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Self::None),
            "90" | "-270" => Ok(Self::Clockwise90),
            "180" | "-180" => Ok(Self::Half),
            "-90" | "270" => Ok(Self::CounterClockwise90),
            other => Err(Error::invalid(
                "rotation",
                format!("{other} is not one of 0, 90, 180, -90"),
            )),
        }
    }
}

/// Convert a working RGBA buffer back to the colour type of `like`.
///
/// Deep colour types come back as their 8-bit counterparts.
#[must_use]
pub fn with_color_of(buffer: RgbaImage, like: &DynamicImage) -> DynamicImage {
    let rgba = DynamicImage::ImageRgba8(buffer);
    match like {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
            DynamicImage::ImageLuma8(rgba.to_luma8())
        }
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLumaA8(rgba.to_luma_alpha8())
        }
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            DynamicImage::ImageRgb8(rgba.to_rgb8())
        }
        _ => rgba,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn test_rotation_parse() {
        assert_eq!("90".parse::<Rotation>().unwrap(), Rotation::Clockwise90);
        assert_eq!("-90".parse::<Rotation>().unwrap(), Rotation::CounterClockwise90);
        assert_eq!(" 180".parse::<Rotation>().unwrap(), Rotation::Half);
        assert!("45".parse::<Rotation>().is_err());
    }

    #[test]
    fn test_rotation_inverse_restores_orientation() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(30, 20, |x, y| {
            Rgb([x as u8, y as u8, 0])
        }));

        for rotation in [
            Rotation::None,
            Rotation::Clockwise90,
            Rotation::Half,
            Rotation::CounterClockwise90,
        ] {
            let turned = rotation.apply(&image);
            if rotation.degrees().abs() == 90 {
                assert_eq!(turned.dimensions(), (20, 30));
            }
            let back = rotation.inverse().apply(&turned);
            assert_eq!(back.dimensions(), (30, 20));
            assert_eq!(back.to_rgb8(), image.to_rgb8());
        }
    }

    #[test]
    fn test_clockwise_moves_top_left_to_top_right() {
        let mut buffer = RgbImage::new(3, 2);
        buffer.put_pixel(0, 0, Rgb([255, 0, 0]));
        let turned = Rotation::Clockwise90.apply(&DynamicImage::ImageRgb8(buffer));
        assert_eq!(turned.to_rgb8().get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_with_color_of_keeps_rgb() {
        let like = DynamicImage::new_rgb8(2, 2);
        let out = with_color_of(RgbaImage::new(2, 2), &like);
        assert_eq!(out.color(), image::ColorType::Rgb8);
    }
}
