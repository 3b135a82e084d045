//! Preparing the masked area before denoising.

use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use ndarray::{Array2, Axis};
use rand::Rng;

use crate::generate::InpaintingFill;
use crate::region::MASK_MAX;

use super::vae::LatentTensor;

/// Blur radius used to smear surrounding colours into the masked area.
const FILL_SIGMA: f32 = 16.0;

/// Replace masked pixels with a heavy blur of the image.
///
/// The blur is taken over unmasked pixels only, so masked content does not
/// leak into the fill.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fill_masked(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let keep = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([MASK_MAX - mask.get_pixel(x, y)[0]])
    });
    let premultiplied = RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let k = u16::from(keep.get_pixel(x, y)[0]);
        let p = image.get_pixel(x, y);
        image::Rgb(p.0.map(|v| ((u16::from(v) * k) / 255) as u8))
    });

    let colour = imageops::blur(&premultiplied, FILL_SIGMA);
    let weight = gaussian_blur_f32(&keep, FILL_SIGMA);

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        if mask.get_pixel(x, y)[0] == 0 {
            return *image.get_pixel(x, y);
        }
        let w = f32::from(weight.get_pixel(x, y)[0]) / 255.0;
        let c = colour.get_pixel(x, y);
        if w <= f32::EPSILON {
            return *c;
        }
        image::Rgb(c.0.map(|v| (f32::from(v) / w).round().clamp(0.0, 255.0) as u8))
    })
}

/// Mask resized to latent resolution, as weights in [0, 1].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn latent_mask(mask: &GrayImage, latent_width: usize, latent_height: usize) -> Array2<f32> {
    let small = imageops::resize(
        mask,
        latent_width as u32,
        latent_height as u32,
        FilterType::Triangle,
    );
    Array2::from_shape_fn((latent_height, latent_width), |(y, x)| {
        f32::from(small.get_pixel(x as u32, y as u32)[0]) / 255.0
    })
}

/// Apply a latent-space fill mode to the masked latents.
///
/// `Fill` and `Original` act on pixels and leave latents untouched.
pub fn apply_latent_fill<R: Rng>(
    latents: &mut LatentTensor,
    mask: &Array2<f32>,
    fill: InpaintingFill,
    rng: &mut R,
) {
    match fill {
        InpaintingFill::Fill | InpaintingFill::Original => {}
        InpaintingFill::LatentNoise => {
            for mut channel in latents.axis_iter_mut(Axis(1)) {
                for ((_, y, x), value) in channel.indexed_iter_mut() {
                    let m = mask[[y, x]];
                    let noise: f32 = rng.random::<f32>().mul_add(2.0, -1.0);
                    *value = (*value).mul_add(1.0 - m, noise * m);
                }
            }
        }
        InpaintingFill::LatentNothing => {
            for mut channel in latents.axis_iter_mut(Axis(1)) {
                for ((_, y, x), value) in channel.indexed_iter_mut() {
                    *value *= 1.0 - mask[[y, x]];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use ndarray::Array4;
    use rand::SeedableRng;

    fn centre_mask(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = (size / 4..3 * size / 4).contains(&x) && (size / 4..3 * size / 4).contains(&y);
            Luma([if inside { 255 } else { 0 }])
        })
    }

    #[test]
    fn test_fill_replaces_masked_content_with_surroundings() {
        let image = RgbImage::from_fn(64, 64, |x, y| {
            let inside = (16..48).contains(&x) && (16..48).contains(&y);
            if inside {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 200])
            }
        });
        let filled = fill_masked(&image, &centre_mask(64));

        assert_eq!(filled.get_pixel(2, 2), &Rgb([0, 0, 200]));
        let centre = filled.get_pixel(32, 32);
        assert!(centre[0] < 30, "red leaked into fill: {centre:?}");
        assert!(centre[2] > 150, "{centre:?}");
    }

    #[test]
    fn test_latent_mask_shape_and_range() {
        let mask = latent_mask(&centre_mask(64), 8, 8);
        assert_eq!(mask.dim(), (8, 8));
        assert!(mask.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((mask[[4, 4]] - 1.0).abs() < f32::EPSILON);
        assert!(mask[[0, 0]].abs() < f32::EPSILON);
    }

    #[test]
    fn test_latent_nothing_zeroes_masked_latents_only() {
        let mut latents = Array4::<f32>::ones((1, 4, 8, 8));
        let mask = latent_mask(&centre_mask(64), 8, 8);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        apply_latent_fill(&mut latents, &mask, InpaintingFill::LatentNothing, &mut rng);

        assert!(latents[[0, 3, 4, 4]].abs() < f32::EPSILON);
        assert!((latents[[0, 3, 0, 0]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_original_leaves_latents_alone() {
        let mut latents = Array4::<f32>::ones((1, 4, 8, 8));
        let mask = Array2::<f32>::ones((8, 8));
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        apply_latent_fill(&mut latents, &mask, InpaintingFill::Original, &mut rng);
        assert!(latents.iter().all(|v| (*v - 1.0).abs() < f32::EPSILON));

        apply_latent_fill(&mut latents, &mask, InpaintingFill::LatentNoise, &mut rng);
        assert!(latents.iter().any(|v| (*v - 1.0).abs() > f32::EPSILON));
    }
}
