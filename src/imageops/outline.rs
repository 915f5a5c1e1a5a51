use image::{ImageBuffer, Pixel};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::bbox::BoundingBox;

/// Draws the outline of `bbox` with the given stroke width, growing inwards.
///
/// Each edge is clipped to the image before drawing, so the cost is bounded by
/// the image size whatever the box coordinates are. Returns whether any pixel
/// was painted; malformed boxes leave the image untouched.
pub fn draw_box<P>(
    image: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    bbox: &BoundingBox,
    color: P,
    stroke: u32,
) -> bool
where
    P: Pixel,
{
    if !bbox.is_well_formed() || stroke == 0 {
        return false;
    }

    let (width, height) = image.dimensions();
    // 画像外の座標は stroke 分の余白まで寄せておく（見える範囲は変わらない）
    let margin = i64::from(stroke) + 1;
    let snap = |v: f32, limit: u32| {
        let lo = -margin as f32;
        let hi = (i64::from(limit) + margin) as f32;
        v.clamp(lo, hi).round() as i64
    };
    let (x1, x2) = (snap(bbox.x1, width), snap(bbox.x2, width));
    let (y1, y2) = (snap(bbox.y1, height), snap(bbox.y2, height));

    let stroke = i64::from(stroke).min(x2 - x1).min(y2 - y1);
    if stroke <= 0 {
        return false;
    }

    let edges = [
        (x1, y1, x2, y1 + stroke),
        (x1, y2 - stroke, x2, y2),
        (x1, y1, x1 + stroke, y2),
        (x2 - stroke, y1, x2, y2),
    ];

    let mut drawn = false;
    for (left, top, right, bottom) in edges {
        let (left, top) = (left.max(0), top.max(0));
        let right = right.min(i64::from(width));
        let bottom = bottom.min(i64::from(height));
        if left >= right || top >= bottom {
            continue;
        }
        let rect = Rect::at(left as i32, top as i32)
            .of_size((right - left) as u32, (bottom - top) as u32);
        draw_filled_rect_mut(image, rect, color);
        drawn = true;
    }
    drawn
}
