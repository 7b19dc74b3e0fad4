use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::RgbaImage;

use crate::types::PlacementRect;

/// Global opacity applied to every jewelry draw.
pub const JEWELRY_OPACITY: f32 = 0.95;

/// Source-over of `src` onto `dst` with its top-left at `(x, y)`. Both images hold
/// straight (non-premultiplied) alpha; pixels outside `dst` are skipped.
pub fn blend_over(dst: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64, opacity: f32) {
    let opacity = opacity.clamp(0.0, 1.0);
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + src.width() as i64).min(dst.width() as i64);
    let y1 = (y + src.height() as i64).min(dst.height() as i64);
    if x0 >= x1 || y0 >= y1 || opacity == 0.0 {
        return;
    }

    for dy in y0..y1 {
        for dx in x0..x1 {
            let s = src.get_pixel((dx - x) as u32, (dy - y) as u32);
            let d = dst.get_pixel_mut(dx as u32, dy as u32);
            d.0 = source_over(s.0, d.0, opacity);
        }
    }
}

fn source_over(src: [u8; 4], dst: [u8; 4], opacity: f32) -> [u8; 4] {
    let sa = src[3] as f32 / 255.0 * opacity;
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let channel = |c: usize| {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    [
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Stretches `src` to exactly `width` x `height`.
pub fn stretch(src: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    if src.dimensions() == (width, height) {
        return Ok(src.clone());
    }
    let source = fir::images::Image::from_vec_u8(
        src.width(),
        src.height(),
        src.as_raw().clone(),
        fir::PixelType::U8x4,
    )?;
    let mut target = fir::images::Image::new(width, height, fir::PixelType::U8x4);
    let options =
        fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&source, &mut target, Some(&options))
        .context("jewelry resize failed")?;
    RgbaImage::from_raw(width, height, target.into_vec())
        .context("resized jewelry buffer has the wrong length")
}

/// Integer destination box for a placement, or `None` when it covers no pixel.
pub fn pixel_box(rect: &PlacementRect) -> Option<(i64, i64, u32, u32)> {
    let values = [rect.x, rect.y, rect.width, rect.height];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let width = rect.width.round();
    let height = rect.height.round();
    if width < 1.0 || height < 1.0 {
        return None;
    }
    Some((
        rect.x.round() as i64,
        rect.y.round() as i64,
        width as u32,
        height as u32,
    ))
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn blending_onto_transparent_keeps_color() {
        let mut dst = RgbaImage::new(4, 4);
        let src = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        blend_over(&mut dst, &src, 1, 1, JEWELRY_OPACITY);

        assert_eq!(dst.get_pixel(1, 1).0, [255, 0, 0, 242]);
        assert_eq!(dst.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(dst.get_pixel(3, 3).0, [0, 0, 0, 0]);
    }

    #[test]
    fn opaque_source_replaces_opaque_destination() {
        let mut dst = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 255, 255]));
        let src = RgbaImage::from_pixel(1, 1, Rgba([0, 255, 0, 255]));
        blend_over(&mut dst, &src, 0, 0, 1.0);
        assert_eq!(dst.get_pixel(0, 0).0, [0, 255, 0, 255]);
        assert_eq!(dst.get_pixel(1, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn out_of_bounds_draws_are_clipped() {
        let mut dst = RgbaImage::new(3, 3);
        let src = RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]));
        blend_over(&mut dst, &src, -2, -2, 1.0);
        assert_eq!(dst.get_pixel(1, 1).0, [9, 9, 9, 255]);
        assert_eq!(dst.get_pixel(2, 2).0, [0, 0, 0, 0]);
        blend_over(&mut dst, &src, 10, 10, 1.0);
    }

    #[test]
    fn stretch_hits_the_requested_size() {
        let src = RgbaImage::from_pixel(10, 4, Rgba([1, 2, 3, 255]));
        let out = stretch(&src, 3, 7).unwrap();
        assert_eq!(out.dimensions(), (3, 7));
    }

    #[test]
    fn degenerate_rects_have_no_pixels() {
        let rect = |width, height| PlacementRect {
            x: 1.4,
            y: 2.6,
            width,
            height,
        };
        assert_eq!(pixel_box(&rect(10.2, 4.5)), Some((1, 3, 10, 5)));
        assert_eq!(pixel_box(&rect(0.2, 4.0)), None);
        assert_eq!(pixel_box(&rect(f32::NAN, 4.0)), None);
    }
}
