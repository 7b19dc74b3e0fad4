use std::sync::Arc;

use gpui::RenderImage;
use image::{Frame as ImageFrame, RgbaImage};

/// Wraps a composited RGBA picture for GPUI, which expects BGRA.
pub(super) fn rgba_to_render_image(mut image: RgbaImage) -> Arc<RenderImage> {
    swap_red_blue(&mut image);
    Arc::new(RenderImage::new(vec![ImageFrame::new(image)]))
}

fn swap_red_blue(image: &mut RgbaImage) {
    // In place; avoids the async asset pipeline and the flicker it causes.
    for px in image.pixels_mut() {
        px.0.swap(0, 2);
    }
}
