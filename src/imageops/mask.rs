use anyhow::{anyhow, ensure, Result};
use image::{GenericImageView, ImageBuffer, Luma, Pixel, Primitive, Rgb};
use num_traits::AsPrimitive;

use crate::imageops::get_max_value;

/// Alpha-blends `color` over every foreground pixel of `mask`.
///
/// A mask pixel's weight is its value relative to full scale, multiplied by
/// `opacity`, so a binary mask gives a flat tint and a soft mask fades out.
pub fn blend<I, M, SI, SM>(
    image: &I,
    mask: &M,
    color: Rgb<SI>,
    opacity: f32,
) -> Result<ImageBuffer<Rgb<SI>, Vec<SI>>>
where
    I: GenericImageView<Pixel = Rgb<SI>>,
    M: GenericImageView<Pixel = Luma<SM>>,
    Rgb<SI>: Pixel<Subpixel = SI>,
    SI: Primitive + 'static + AsPrimitive<f32>,
    SM: Primitive + 'static + AsPrimitive<f32>,
    f32: AsPrimitive<SI>,
{
    ensure!(
        image.dimensions() == mask.dimensions(),
        "Image and mask dimensions do not match: image {:?}, mask {:?}",
        image.dimensions(),
        mask.dimensions()
    );
    ensure!(
        (0.0..=1.0).contains(&opacity),
        "Opacity must be within 0..=1, got {opacity}"
    );

    let sm_max: f32 = get_max_value::<SM>().as_();
    let Rgb(tint) = color;

    let blended = image
        .pixels()
        .zip(mask.pixels())
        .flat_map(|((_, _, image_pixel), (_, _, mask_pixel))| {
            let Luma([weight]) = mask_pixel;
            let alpha = (weight.as_() / sm_max).clamp(0.0, 1.0) * opacity;
            let Rgb(channels) = image_pixel;
            channels
                .into_iter()
                .zip(tint)
                .map(move |(c, t)| (c.as_() * (1.0 - alpha) + t.as_() * alpha).round().as_())
        })
        .collect::<Vec<SI>>();

    ImageBuffer::from_raw(image.width(), image.height(), blended)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from blended pixels"))
}

/// Number of foreground pixels in a mask.
pub fn coverage<S: Primitive>(mask: &ImageBuffer<Luma<S>, Vec<S>>) -> usize {
    mask.pixels().filter(|Luma([v])| *v > S::zero()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn test_blend_only_touches_foreground() -> Result<()> {
        let image = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, Luma([255]));

        let out = blend(&image, &mask, Rgb([30, 144, 255]), 0.6)?;

        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 100, 100]));
        // 100 * 0.4 + 30 * 0.6 = 58, 100 * 0.4 + 144 * 0.6 = 126.4, 100 * 0.4 + 255 * 0.6 = 193
        assert_eq!(out.get_pixel(1, 1), &Rgb([58, 126, 193]));
        Ok(())
    }

    #[test]
    fn test_blend_rejects_mismatched_mask() {
        let image = RgbImage::new(4, 4);
        let mask = GrayImage::new(3, 4);
        assert!(blend(&image, &mask, Rgb([0, 0, 0]), 0.6).is_err());
    }

    #[test]
    fn test_coverage() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(0, 0, Luma([1]));
        mask.put_pixel(4, 4, Luma([255]));
        assert_eq!(coverage(&mask), 2);
    }
}
