//! EXIF embedding for JPEG and WebP outputs.
//!
//! Only one field is ever written: `UserComment`, holding the generation
//! parameters. The TIFF block comes from `kamadak-exif`; this module only
//! splices it into the JPEG and WebP containers.

use std::io::Cursor;

use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};

const UNICODE_PREFIX: &[u8; 8] = b"UNICODE\0";

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_APP0: u8 = 0xE0;
const JPEG_APP1: u8 = 0xE1;
const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

const WEBP_FLAG_EXIF: u8 = 0x08;
const WEBP_FLAG_ALPHA: u8 = 0x10;

/// Build a big-endian TIFF/EXIF block whose only field is a Unicode `UserComment`.
///
/// # Errors
///
/// Fails when the EXIF writer rejects the field.
pub fn exif_user_comment(comment: &str) -> Result<Vec<u8>, String> {
    let mut payload = UNICODE_PREFIX.to_vec();
    payload.extend(comment.encode_utf16().flat_map(u16::to_be_bytes));

    let field = Field {
        tag: Tag::UserComment,
        ifd_num: In::PRIMARY,
        value: Value::Undefined(payload, 0),
    };
    let mut writer = Writer::new();
    writer.push_field(&field);

    let mut out = Cursor::new(Vec::new());
    writer
        .write(&mut out, false)
        .map_err(|e| format!("cannot build EXIF block: {e}"))?;
    Ok(out.into_inner())
}

/// Insert `exif` as an APP1 segment after the SOI marker (and JFIF APP0, if any).
///
/// # Errors
///
/// Fails when `jpeg` does not start with SOI or the block exceeds one segment.
pub fn insert_jpeg_exif(jpeg: &[u8], exif: &[u8]) -> Result<Vec<u8>, String> {
    if !jpeg.starts_with(&JPEG_SOI) {
        return Err("missing JPEG start-of-image marker".to_string());
    }

    let segment_len = 2 + EXIF_HEADER.len() + exif.len();
    let segment_len =
        u16::try_from(segment_len).map_err(|_| format!("EXIF block of {segment_len} bytes is too large"))?;

    let mut insert_at = JPEG_SOI.len();
    if jpeg.get(insert_at..insert_at + 2) == Some(&[0xFF, JPEG_APP0][..]) {
        let len = jpeg
            .get(insert_at + 2..insert_at + 4)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or_else(|| "truncated APP0 segment".to_string())?;
        insert_at += 2 + len;
        if insert_at > jpeg.len() {
            return Err("truncated APP0 segment".to_string());
        }
    }

    let mut out = Vec::with_capacity(jpeg.len() + usize::from(segment_len) + 2);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, JPEG_APP1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(exif);
    out.extend_from_slice(&jpeg[insert_at..]);

    Ok(out)
}

/// Add an `EXIF` chunk to a WebP file, converting it to the extended format.
///
/// # Errors
///
/// Fails when `webp` is not a RIFF/WEBP container.
#[allow(clippy::cast_possible_truncation)]
pub fn insert_webp_exif(
    webp: &[u8],
    exif: &[u8],
    width: u32,
    height: u32,
    has_alpha: bool,
) -> Result<Vec<u8>, String> {
    if webp.len() < 12 || &webp[..4] != b"RIFF" || &webp[8..12] != b"WEBP" {
        return Err("not a RIFF/WEBP container".to_string());
    }
    if width == 0 || height == 0 || width > 1 << 24 || height > 1 << 24 {
        return Err(format!("canvas {width}x{height} out of WebP range"));
    }

    let chunks = &webp[12..];
    let mut body = Vec::with_capacity(chunks.len() + exif.len() + 32);

    if chunks.starts_with(b"VP8X") && chunks.len() >= 18 {
        body.extend_from_slice(chunks);
        // flags byte sits right after the chunk header
        body[8] |= WEBP_FLAG_EXIF;
    } else {
        let mut flags = WEBP_FLAG_EXIF;
        if has_alpha {
            flags |= WEBP_FLAG_ALPHA;
        }
        body.extend_from_slice(b"VP8X");
        body.extend_from_slice(&10u32.to_le_bytes());
        body.push(flags);
        body.extend_from_slice(&[0, 0, 0]);
        body.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
        body.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
        body.extend_from_slice(chunks);
    }

    body.extend_from_slice(b"EXIF");
    body.extend_from_slice(&(exif.len() as u32).to_le_bytes());
    body.extend_from_slice(exif);
    if exif.len() % 2 == 1 {
        body.push(0);
    }

    let riff_size = u32::try_from(body.len() + 4).map_err(|_| "WebP file too large".to_string())?;

    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_size.to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(&body);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(8, 8);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    fn comment_text(value: &exif::Value) -> String {
        match value {
            exif::Value::Undefined(bytes, _) => {
                assert!(bytes.starts_with(UNICODE_PREFIX));
                let text: Vec<u16> = bytes[8..]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&text).unwrap()
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_user_comment_block() {
        let block = exif_user_comment("hi").unwrap();
        assert_eq!(&block[..4], b"MM\0*");

        let parsed = exif::Reader::new().read_raw(block).unwrap();
        let field = parsed
            .get_field(exif::Tag::UserComment, exif::In::PRIMARY)
            .unwrap();
        assert_eq!(comment_text(&field.value), "hi");
    }

    #[test]
    fn test_jpeg_exif_is_readable() {
        let jpeg = tiny_jpeg();
        let with_exif = insert_jpeg_exif(&jpeg, &exif_user_comment("Steps: 20").unwrap()).unwrap();

        let reader = exif::Reader::new()
            .read_from_container(&mut Cursor::new(&with_exif))
            .unwrap();
        let field = reader
            .get_field(exif::Tag::UserComment, exif::In::PRIMARY)
            .unwrap();
        assert_eq!(comment_text(&field.value), "Steps: 20");

        // Still decodes as an image.
        assert!(image::load_from_memory(&with_exif).is_ok());
    }

    #[test]
    fn test_jpeg_requires_soi() {
        assert!(insert_jpeg_exif(b"nope", &[]).is_err());
    }

    #[test]
    fn test_webp_gets_extended_header() {
        let img = image::DynamicImage::new_rgba8(5, 3);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::WebP)
            .unwrap();

        let exif = exif_user_comment("abc").unwrap();
        let out = insert_webp_exif(&buf, &exif, 5, 3, true).unwrap();

        assert_eq!(&out[..4], b"RIFF");
        assert_eq!(
            u32::from_le_bytes([out[4], out[5], out[6], out[7]]) as usize,
            out.len() - 8
        );
        assert_eq!(&out[12..16], b"VP8X");
        assert_eq!(out[20], WEBP_FLAG_EXIF | WEBP_FLAG_ALPHA);
        assert_eq!(&out[24..27], &[4, 0, 0]);
        assert_eq!(&out[27..30], &[2, 0, 0]);
        assert!(out.windows(4).any(|w| w == b"EXIF"));
        assert!(image::load_from_memory(&out).is_ok());
    }
}
