//! Image saving utilities.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

use crate::error::{Error, Result};

use super::metadata::{exif_user_comment, insert_jpeg_exif, insert_webp_exif};
use super::ImageTensor;

/// Key of the generation parameters entry.
pub const PARAMETERS_KEY: &str = "parameters";

/// Ordered text entries written alongside an output image.
///
/// PNG files get one `tEXt` chunk per entry. JPEG and WebP files only carry
/// the `parameters` entry, as an EXIF user comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    entries: Vec<(String, String)>,
}

impl ImageMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The generation parameters string, if any.
    #[must_use]
    pub fn parameters(&self) -> Option<&str> {
        self.get(PARAMETERS_KEY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Save an image, embedding `metadata` where the format allows.
///
/// The format is inferred from the extension:
/// - `png`: text chunks for every entry
/// - `jpg`/`jpeg`: EXIF user comment with the parameters, encoded at `quality`;
///   parameters too long for one APP1 segment are dropped with a warning
/// - `webp`: lossless, EXIF user comment with the parameters
/// - anything else: pixels only
///
/// # Errors
///
/// Returns an error if the image cannot be encoded or written.
pub fn save_image<P: AsRef<Path>>(
    image: &DynamicImage,
    path: P,
    metadata: &ImageMetadata,
    quality: u8,
) -> Result<()> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "png" => save_png(image, path, metadata),
        "jpg" | "jpeg" => {
            let flattened = if image.color().has_color() {
                DynamicImage::ImageRgb8(image.to_rgb8())
            } else {
                DynamicImage::ImageLuma8(image.to_luma8())
            };
            let mut bytes = Vec::new();
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality);
            flattened
                .write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
            let bytes = match metadata.parameters() {
                Some(info) => {
                    match exif_user_comment(info).and_then(|exif| insert_jpeg_exif(&bytes, &exif)) {
                        Ok(with_exif) => with_exif,
                        Err(reason) => {
                            tracing::warn!(
                                "Writing {} without parameters: {reason}",
                                path.display()
                            );
                            bytes
                        }
                    }
                }
                None => bytes,
            };
            std::fs::write(path, bytes)?;
            Ok(())
        }
        "webp" => {
            let has_alpha = image.color().has_alpha();
            let converted = if has_alpha {
                DynamicImage::ImageRgba8(image.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8())
            };
            let mut bytes = Vec::new();
            converted
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::WebP)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
            let bytes = match metadata.parameters() {
                Some(info) => exif_user_comment(info)
                    .and_then(|exif| {
                        insert_webp_exif(
                            &bytes,
                            &exif,
                            converted.width(),
                            converted.height(),
                            has_alpha,
                        )
                    })
                    .map_err(|reason| Error::Metadata {
                        path: path.to_path_buf(),
                        reason,
                    })?,
                None => bytes,
            };
            std::fs::write(path, bytes)?;
            Ok(())
        }
        _ => image.save(path).map_err(|source| Error::ImageSave {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn save_png(image: &DynamicImage, path: &Path, metadata: &ImageMetadata) -> Result<()> {
    let (color, data) = match image {
        DynamicImage::ImageLuma8(buf) => (png::ColorType::Grayscale, buf.as_raw().clone()),
        DynamicImage::ImageLumaA8(buf) => (png::ColorType::GrayscaleAlpha, buf.as_raw().clone()),
        DynamicImage::ImageRgb8(buf) => (png::ColorType::Rgb, buf.as_raw().clone()),
        other if !other.color().has_alpha() => (png::ColorType::Rgb, other.to_rgb8().into_raw()),
        other => (png::ColorType::Rgba, other.to_rgba8().into_raw()),
    };

    let to_error = |source| Error::PngEncode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), image.width(), image.height());
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    for (key, value) in metadata.iter() {
        encoder
            .add_text_chunk(key.to_string(), value.to_string())
            .map_err(to_error)?;
    }

    let mut writer = encoder.write_header().map_err(to_error)?;
    writer.write_image_data(&data).map_err(to_error)?;
    writer.finish().map_err(to_error)?;

    Ok(())
}

/// Convert a normalized NCHW tensor to an RGB image.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn tensor_to_image(tensor: &ImageTensor) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let (_, _, height, width) = tensor.dim();

    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        // Denormalize from [-1, 1] to [0, 255]
        Rgb([
            denormalize(tensor[[0, 0, y, x]]),
            denormalize(tensor[[0, 1, y, x]]),
            denormalize(tensor[[0, 2, y, x]]),
        ])
    })
}

/// Denormalize a value from [-1, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    // Safe: clamped to [0, 255] range before casting
    let scaled = (value + 1.0) * 127.5;
    scaled.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};
    use ndarray::Array4;

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(6, 4, |x, y| {
            Rgba([(x * 40) as u8, (y * 60) as u8, 9, 200])
        }))
    }

    fn with_parameters(info: &str) -> ImageMetadata {
        let mut metadata = ImageMetadata::new();
        metadata.insert(PARAMETERS_KEY, info);
        metadata
    }

    #[test]
    fn test_denormalize() {
        assert_eq!(denormalize(-1.0), 0);
        assert_eq!(denormalize(0.0), 127);
        assert_eq!(denormalize(1.0), 255);
    }

    #[test]
    fn test_denormalize_clamp() {
        assert_eq!(denormalize(-2.0), 0);
        assert_eq!(denormalize(2.0), 255);
    }

    #[test]
    fn test_tensor_to_image_uses_tensor_size() {
        let tensor = Array4::<f32>::zeros((1, 3, 24, 40));
        let img = tensor_to_image(&tensor);
        assert_eq!(img.dimensions(), (40, 24));
        assert_eq!(img.get_pixel(0, 0), &Rgb([127, 127, 127]));
    }

    #[test]
    fn test_metadata_insert_replaces() {
        let mut metadata = ImageMetadata::new();
        metadata.insert("a", "1");
        metadata.insert("b", "2");
        metadata.insert("a", "3");
        let entries: Vec<_> = metadata.iter().collect();
        assert_eq!(entries, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_png_text_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut metadata = with_parameters("a cat\nSteps: 20");
        metadata.insert("loopback_params", "Firstpass size: 256x256");

        save_image(&sample(), &path, &metadata, 95).unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        let texts: Vec<(String, String)> = reader
            .info()
            .uncompressed_latin1_text
            .iter()
            .map(|t| (t.keyword.clone(), t.text.clone()))
            .collect();
        assert!(texts.contains(&("parameters".to_string(), "a cat\nSteps: 20".to_string())));
        assert!(texts.iter().any(|(k, _)| k == "loopback_params"));

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.to_rgba8(), sample().to_rgba8());
    }

    #[test]
    fn test_jpeg_with_parameters_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.JPG");
        save_image(&sample(), &path, &with_parameters("p"), 90).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.windows(6).any(|w| w == b"Exif\0\0"));
        assert_eq!(image::open(&path).unwrap().dimensions(), (6, 4));
    }

    #[test]
    fn test_jpeg_with_oversized_parameters_is_still_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        let info = "x".repeat(40_000);
        save_image(&sample(), &path, &with_parameters(&info), 90).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.windows(6).any(|w| w == b"Exif\0\0"));
        assert_eq!(image::open(&path).unwrap().dimensions(), (6, 4));
    }

    #[test]
    fn test_webp_keeps_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.webp");
        save_image(&sample(), &path, &with_parameters("p"), 90).unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.to_rgba8(), sample().to_rgba8());
    }

    #[test]
    fn test_other_format_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bmp");
        save_image(&sample(), &path, &with_parameters("p"), 90).unwrap();
        assert_eq!(image::open(&path).unwrap().dimensions(), (6, 4));
    }
}
