use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};

use crate::bbox::BoundingBox;
use crate::errors::{LeafSamError, Result};
use crate::imageops::{mask, outline};
use crate::traits::Mask;

pub const MASK_COLOR: Rgb<u8> = Rgb([30, 144, 255]);
pub const MASK_OPACITY: f32 = 0.6;
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 128, 0]);
pub const BOX_STROKE: u32 = 2;

/// Overlays the predicted mask and the prompt box on the source image.
///
/// The composite keeps the source dimensions exactly; nothing is padded or
/// cropped.
pub fn compose(image: &RgbImage, predicted: &Mask, prompt: &BoundingBox) -> Result<RgbImage> {
    let mut composite =
        mask::blend(image, predicted, MASK_COLOR, MASK_OPACITY).map_err(|e| {
            LeafSamError::ImageProcessing {
                operation: "mask overlay".to_string(),
                source: e.into(),
            }
        })?;

    if !outline::draw_box(&mut composite, prompt, BOX_COLOR, BOX_STROKE) {
        tracing::debug!(?prompt, "box outline skipped");
    }
    Ok(composite)
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| LeafSamError::ImageProcessing {
            operation: "png encoding".to_string(),
            source: Box::new(e),
        })?;
    Ok(buffer.into_inner())
}

/// PNG-encodes the composite and wraps it in standard base64 for JSON.
pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    Ok(STANDARD.encode(encode_png(image)?))
}
