//! Image normalization: crop, downscale, WebP encode, and placeholder.

use base64::Engine;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::config::{CaptureConfig, Geometry};
use crate::error::IngestResult;
use crate::types::{CaptureOrigin, ImageArtifact};

/// Decode `raw` and produce the normalized artifact.
///
/// Identical input always yields identical output.
pub fn normalize(
    raw: &[u8],
    config: &CaptureConfig,
    origin: CaptureOrigin,
) -> IngestResult<ImageArtifact> {
    let img = image::load_from_memory(raw)?;
    let cropped = crop_to_aspect(&img, config.output);
    let scaled = fit_within(&cropped, config.output);
    let encoded = encode_webp(&scaled)?;
    let placeholder = placeholder_uri(&scaled, config.placeholder)?;
    let (width, height) = scaled.dimensions();

    tracing::debug!(
        "Normalized {}x{} capture to {width}x{height} ({} bytes)",
        img.width(),
        img.height(),
        encoded.len()
    );
    Ok(ImageArtifact {
        raw: raw.to_vec(),
        encoded,
        width,
        height,
        origin,
        placeholder,
    })
}

/// Crop to the aspect ratio of `target`: top-anchored vertically,
/// centred horizontally.
pub fn crop_to_aspect(img: &DynamicImage, target: Geometry) -> DynamicImage {
    let (w, h) = img.dimensions();
    // Compare w/h against tw/th without floats.
    let lhs = w as u64 * target.height as u64;
    let rhs = h as u64 * target.width as u64;
    if lhs > rhs {
        let new_w = ((h as u64 * target.width as u64) / target.height as u64).max(1) as u32;
        img.crop_imm((w - new_w) / 2, 0, new_w, h)
    } else if lhs < rhs {
        let new_h = ((w as u64 * target.height as u64) / target.width as u64).max(1) as u32;
        img.crop_imm(0, 0, w, new_h)
    } else {
        img.clone()
    }
}

/// Downscale into `bounds` with Lanczos3; never upscales.
pub fn fit_within(img: &DynamicImage, bounds: Geometry) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w > bounds.width || h > bounds.height {
        img.resize(bounds.width, bounds.height, FilterType::Lanczos3)
    } else {
        img.clone()
    }
}

pub fn encode_webp(img: &DynamicImage) -> IngestResult<Vec<u8>> {
    let rgba = img.to_rgba8();
    let mut buf = Vec::new();
    rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buf))?;
    Ok(buf)
}

/// Small WebP thumbnail as a `data:` URI.
pub fn placeholder_uri(img: &DynamicImage, bounds: Geometry) -> IngestResult<String> {
    let thumb = fit_within(img, bounds);
    let bytes = encode_webp(&thumb)?;
    Ok(format!(
        "data:image/webp;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_large_capture_is_cropped_and_downscaled() {
        let config = CaptureConfig::default();
        let art = normalize(&png(900, 1600), &config, CaptureOrigin::Auto).unwrap();
        assert_eq!((art.width, art.height), (600, 800));
        assert!(art.byte_size() > 0);
        let decoded = image::load_from_memory(&art.encoded).unwrap();
        assert_eq!(decoded.dimensions(), (600, 800));
    }

    #[test]
    fn test_never_upscales() {
        let config = CaptureConfig::default();
        let art = normalize(&png(300, 400), &config, CaptureOrigin::Uploaded).unwrap();
        assert_eq!((art.width, art.height), (300, 400));
        assert_eq!(art.origin, CaptureOrigin::Uploaded);
    }

    #[test]
    fn test_crop_is_top_anchored_and_centred() {
        let img = DynamicImage::new_rgb8(400, 400);
        let tall = crop_to_aspect(&img, Geometry::new(3, 4));
        assert_eq!(tall.dimensions(), (300, 400));
        let wide = crop_to_aspect(&DynamicImage::new_rgb8(300, 1000), Geometry::new(3, 4));
        assert_eq!(wide.dimensions(), (300, 400));
    }

    #[test]
    fn test_deterministic() {
        let config = CaptureConfig::default();
        let raw = png(1280, 900);
        let a = normalize(&raw, &config, CaptureOrigin::Auto).unwrap();
        let b = normalize(&raw, &config, CaptureOrigin::Auto).unwrap();
        assert_eq!(a.encoded, b.encoded);
        assert_eq!(a.placeholder, b.placeholder);
    }

    #[test]
    fn test_placeholder_fits_box() {
        let config = CaptureConfig::default();
        let art = normalize(&png(600, 800), &config, CaptureOrigin::Auto).unwrap();
        let b64 = art.placeholder.strip_prefix("data:image/webp;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert!(thumb.width() <= 100 && thumb.height() <= 133);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let config = CaptureConfig::default();
        assert!(normalize(b"not an image", &config, CaptureOrigin::Uploaded).is_err());
    }
}
