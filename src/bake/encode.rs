//! PNG encoding of bake results.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

use super::{BakeError, ImageBuffer};
use crate::material::SlotKind;

/// Linear to sRGB transfer function.
pub fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn quantize(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Encode `buffer` as an 8-bit PNG.
///
/// Colour slots are sRGB encoded, normal slots stay linear RGB, scalar and
/// occlusion slots become single-channel grey.
pub fn encode_png(buffer: &ImageBuffer, kind: SlotKind) -> Result<Vec<u8>, BakeError> {
    let (w, h) = (buffer.width, buffer.height);
    let image = match kind {
        SlotKind::Color | SlotKind::Normal => {
            let transfer: fn(f32) -> f32 = if kind == SlotKind::Color { linear_to_srgb } else { |c| c };
            let raw: Vec<u8> = buffer
                .pixels
                .iter()
                .flat_map(|p| [quantize(transfer(p.x)), quantize(transfer(p.y)), quantize(transfer(p.z))])
                .collect();
            RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8)
        }
        SlotKind::Scalar | SlotKind::Occlusion => {
            let raw: Vec<u8> = buffer.pixels.iter().map(|p| quantize(p.x)).collect();
            GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8)
        }
    }
    .ok_or_else(|| BakeError::Encode(format!("buffer does not hold {w}x{h} pixels")))?;

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| BakeError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec4;

    #[test]
    fn test_srgb_curve() {
        assert_eq!(linear_to_srgb(0.0), 0.0);
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
        assert!((linear_to_srgb(0.214) - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_grey_png() {
        let mut buf = ImageBuffer::new(4, 4);
        buf.pixels.fill(Vec4::splat(0.5));
        let png = encode_png(&buf, SlotKind::Scalar).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
        assert_eq!(decoded.to_luma8().get_pixel(1, 1).0, [128]);
    }

    #[test]
    fn test_color_png_is_srgb() {
        let mut buf = ImageBuffer::new(2, 2);
        buf.pixels.fill(Vec4::new(0.214, 0.0, 1.0, 1.0));
        let png = encode_png(&buf, SlotKind::Color).unwrap();
        let px = image::load_from_memory(&png).unwrap().to_rgb8().get_pixel(0, 0).0;
        assert!((px[0] as i32 - 128).abs() <= 1);
        assert_eq!(px[1], 0);
        assert_eq!(px[2], 255);
    }

    #[test]
    fn test_size_mismatch() {
        let mut buf = ImageBuffer::new(2, 2);
        buf.pixels.pop();
        assert!(matches!(encode_png(&buf, SlotKind::Normal), Err(BakeError::Encode(_))));
    }
}
