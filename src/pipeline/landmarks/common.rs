use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Point};

/// Maps between the square model input and the source frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_w: u32,
    pub frame_h: u32,
}

impl Letterbox {
    /// Model-input pixel coordinates back to frame pixels, clamped to the frame.
    pub fn unmap(&self, x: f32, y: f32) -> Point {
        Point::new(
            ((x - self.pad_x) / self.scale).clamp(0.0, self.frame_w.saturating_sub(1) as f32),
            ((y - self.pad_y) / self.scale).clamp(0.0, self.frame_h.saturating_sub(1) as f32),
        )
    }
}

/// Square RGBA canvas holding the frame scaled to fit and centered on black.
pub struct LetterboxedFrame {
    pub rgba: Vec<u8>,
    pub size: u32,
    pub letterbox: Letterbox,
}

impl LetterboxedFrame {
    /// NHWC RGB tensor with values in `[0, 1]`.
    pub fn to_nhwc_unit(&self) -> Result<Array4<f32>> {
        let data: Vec<f32> = self
            .rgba
            .par_chunks_exact(4)
            .flat_map_iter(|px| [px[0], px[1], px[2]].map(|c| c as f32 / 255.0))
            .collect();
        let side = self.size as usize;
        Array4::from_shape_vec((1, side, side, 3), data)
            .map_err(|err| anyhow!("failed to build NHWC tensor: {err}"))
    }

    /// NCHW BGR tensor with raw `[0, 255]` values.
    pub fn to_nchw_bgr(&self) -> Result<Array4<f32>> {
        let side = self.size as usize;
        let plane = side * side;
        let mut data = vec![0.0f32; plane * 3];
        let (blue, rest) = data.split_at_mut(plane);
        let (green, red) = rest.split_at_mut(plane);
        for (i, px) in self.rgba.chunks_exact(4).enumerate() {
            red[i] = px[0] as f32;
            green[i] = px[1] as f32;
            blue[i] = px[2] as f32;
        }
        Array4::from_shape_vec((1, 3, side, side), data)
            .map_err(|err| anyhow!("failed to build NCHW tensor: {err}"))
    }
}

pub fn ensure_frame_buffer(frame: &Frame) -> Result<()> {
    let expected = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.is_empty() || frame.rgba.len() != expected {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {expected}",
            frame.rgba.len()
        ));
    }
    Ok(())
}

pub fn letterbox_frame(frame: &Frame, size: u32) -> Result<LetterboxedFrame> {
    ensure_frame_buffer(frame)?;

    let scale = size as f32 / frame.width.max(frame.height) as f32;
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, size);

    let resized = if (new_w, new_h) == (frame.width, frame.height) {
        frame.rgba.clone()
    } else {
        let src = fir::images::Image::from_vec_u8(
            frame.width,
            frame.height,
            frame.rgba.clone(),
            fir::PixelType::U8x4,
        )?;
        let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
        let options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
        fir::Resizer::new()
            .resize(&src, &mut dst, Some(&options))
            .context("fast resize failed")?;
        dst.into_vec()
    };

    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;
    let stride = size as usize * 4;
    let row_len = new_w as usize * 4;
    let mut rgba = vec![0u8; stride * size as usize];
    rgba.chunks_exact_mut(4).for_each(|px| px[3] = 255);
    for (row, src_row) in resized.chunks_exact(row_len).enumerate() {
        let offset = (pad_y as usize + row) * stride + pad_x as usize * 4;
        rgba[offset..offset + row_len].copy_from_slice(src_row);
    }

    Ok(LetterboxedFrame {
        rgba,
        size,
        letterbox: Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            frame_w: frame.width,
            frame_h: frame.height,
        },
    })
}

/// A square, rotated region of the frame resampled to `output_size`.
#[derive(Clone, Debug)]
pub struct RotatedCrop {
    pub center: Point,
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub frame_w: u32,
    pub frame_h: u32,
}

impl RotatedCrop {
    pub fn new(frame: &Frame, center: Point, side: f32, angle: f32, output_size: u32) -> Self {
        Self {
            center,
            side,
            angle,
            output_size,
            frame_w: frame.width,
            frame_h: frame.height,
        }
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let (sin, cos) = self.angle.sin_cos();
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        (
            self.center.x + dx * cos - dy * sin,
            self.center.y + dx * sin + dy * cos,
        )
    }

    /// Crop pixel coordinates to frame pixels, clamped to the frame.
    pub fn project(&self, x: f32, y: f32) -> Point {
        let (fx, fy) = self.to_frame(x, y);
        Point::new(
            fx.clamp(0.0, self.frame_w.saturating_sub(1) as f32),
            fy.clamp(0.0, self.frame_h.saturating_sub(1) as f32),
        )
    }

    /// Bilinearly sampled NHWC RGB tensor in `[0, 1]`; outside the frame reads black.
    pub fn sample_nhwc(&self, frame: &Frame) -> Result<Array4<f32>> {
        ensure_frame_buffer(frame)?;
        let size = self.output_size as usize;
        let data: Vec<f32> = (0..size * size)
            .into_par_iter()
            .flat_map_iter(|i| {
                let (x, y) = ((i % size) as f32 + 0.5, (i / size) as f32 + 0.5);
                let (sx, sy) = self.to_frame(x, y);
                sample_rgb(frame, sx - 0.5, sy - 0.5)
            })
            .collect();
        Array4::from_shape_vec((1, size, size, 3), data)
            .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))
    }
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0.0; 3];
    }
    let fetch = |ix: i64, iy: i64| -> [f32; 3] {
        if ix < 0 || iy < 0 || ix >= frame.width as i64 || iy >= frame.height as i64 {
            return [0.0; 3];
        }
        let idx = (iy as usize * frame.width as usize + ix as usize) * 4;
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (ix, iy) = (x0 as i64, y0 as i64);
    let c00 = fetch(ix, iy);
    let c10 = fetch(ix + 1, iy);
    let c01 = fetch(ix, iy + 1);
    let c11 = fetch(ix + 1, iy + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}

/// Axis-aligned box as `[x1, y1, x2, y2]`.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy non-maximum suppression. Returns indices into `boxes`, best score first.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        if keep.len() >= top_k {
            break;
        }
        if keep.iter().all(|&k| iou(&boxes[idx], &boxes[k]) < threshold) {
            keep.push(idx);
        }
    }
    keep
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let rgba = (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect();
        Frame::new(rgba, width, height)
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let boxed = letterbox_frame(&solid_frame(200, 100, [255, 0, 0]), 100).unwrap();
        assert_eq!(boxed.letterbox.scale, 0.5);
        assert_eq!(boxed.letterbox.pad_x, 0.0);
        assert_eq!(boxed.letterbox.pad_y, 25.0);
        // Top padding stays black, the middle row carries the frame.
        assert_eq!(&boxed.rgba[0..3], &[0, 0, 0]);
        let mid = (50 * 100 + 50) * 4;
        assert!(boxed.rgba[mid] > 250);
        assert!(boxed.rgba[mid + 1] < 5);

        let p = boxed.letterbox.unmap(50.0, 50.0);
        assert_eq!(p, Point::new(100.0, 50.0));
    }

    #[test]
    fn nchw_tensor_is_bgr_ordered() {
        let boxed = letterbox_frame(&solid_frame(4, 4, [10, 20, 30]), 4).unwrap();
        let tensor = boxed.to_nchw_bgr().unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        assert_eq!(tensor[[0, 0, 1, 1]], 30.0);
        assert_eq!(tensor[[0, 1, 1, 1]], 20.0);
        assert_eq!(tensor[[0, 2, 1, 1]], 10.0);
    }

    #[test]
    fn rejects_truncated_frames() {
        let frame = Frame::new(vec![0; 10], 4, 4);
        assert!(letterbox_frame(&frame, 8).is_err());
    }

    #[test]
    fn unrotated_crop_projects_linearly() {
        let frame = solid_frame(100, 100, [0, 0, 0]);
        let crop = RotatedCrop::new(&frame, Point::new(50.0, 50.0), 40.0, 0.0, 20);
        assert_eq!(crop.project(10.0, 10.0), Point::new(50.0, 50.0));
        assert_eq!(crop.project(0.0, 0.0), Point::new(30.0, 30.0));
    }

    #[test]
    fn nms_drops_overlapping_boxes() {
        let boxes = [
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 11.0, 11.0],
            [50.0, 50.0, 60.0, 60.0],
        ];
        let scores = [0.8, 0.9, 0.7];
        assert_eq!(nms(&boxes, &scores, 0.3, 10), vec![1, 2]);
        assert_eq!(nms(&boxes, &scores, 0.3, 1), vec![1]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 1.0]) - 0.5).abs() < 1e-6);
    }
}
