use image::{imageops, imageops::FilterType, ImageBuffer, Pixel};

/// Resizes so the longest side equals `target`, keeping the aspect ratio.
///
/// Returns the resized image and the scale factor applied to source
/// coordinates.
pub fn fit_longest_side<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    target: u32,
) -> (ImageBuffer<P, Vec<P::Subpixel>>, f32)
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (width, height) = image.dimensions();
    let scale = target as f32 / width.max(height).max(1) as f32;
    let (new_width, new_height) = scaled_dimensions(width, height, scale);
    (
        imageops::resize(image, new_width, new_height, FilterType::Lanczos3),
        scale,
    )
}

/// Dimensions after scaling, never collapsing a side to zero.
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = (width as f32 * scale + 0.5) as u32;
    let h = (height as f32 * scale + 0.5) as u32;
    (w.max(1), h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_landscape_fits_width() {
        let image = RgbImage::new(640, 480);
        let (resized, scale) = fit_longest_side(&image, 1024);
        assert_eq!(resized.dimensions(), (1024, 768));
        assert_eq!(scale, 1.6);
    }

    #[test]
    fn test_portrait_fits_height() {
        let image = RgbImage::new(300, 1200);
        let (resized, scale) = fit_longest_side(&image, 1024);
        assert_eq!(resized.dimensions(), (256, 1024));
        assert!((scale - 1024.0 / 1200.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_thin_side_never_zero() {
        assert_eq!(scaled_dimensions(4000, 1, 0.1), (400, 1));
    }
}
