use std::{f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    anchors::{ANCHORS, NUM_ANCHORS},
    common::{Letterbox, letterbox_frame, nms, sigmoid},
};
use crate::types::{Frame, Point};

pub const PALM_INPUT_SIZE: u32 = 192;
const PALM_KEYPOINTS: usize = 7;
const MIN_CROP_SIDE: f32 = 80.0;
const CROP_EXPANSION: f32 = 2.4;

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 8,
        }
    }
}

/// A detected palm in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub keypoints: Vec<Point>,
    pub score: f32,
}

impl PalmRegion {
    /// Center, side and rotation of the square crop handed to the handpose model.
    /// The crop is generous so that fingers stay inside it.
    pub fn handpose_crop(&self) -> (Point, f32, f32) {
        let center = if self.keypoints.is_empty() {
            Point::new(
                (self.bbox[0] + self.bbox[2]) * 0.5,
                (self.bbox[1] + self.bbox[3]) * 0.5,
            )
        } else {
            centroid(&self.keypoints)
        };

        let span = self
            .keypoints
            .iter()
            .fold(None::<[f32; 4]>, |acc, p| {
                Some(match acc {
                    None => [p.x, p.x, p.y, p.y],
                    Some([x0, x1, y0, y1]) => [x0.min(p.x), x1.max(p.x), y0.min(p.y), y1.max(p.y)],
                })
            })
            .map(|[x0, x1, y0, y1]| (x1 - x0).max(y1 - y0))
            .unwrap_or(0.0);
        let box_side = (self.bbox[2] - self.bbox[0])
            .abs()
            .max((self.bbox[3] - self.bbox[1]).abs());
        let side = box_side.max(span).max(MIN_CROP_SIDE) * CROP_EXPANSION;

        (center, side, self.orientation())
    }

    /// Principal axis of the keypoints, turned so the fingers point up in the crop.
    pub fn orientation(&self) -> f32 {
        if self.keypoints.len() < 2 {
            return 0.0;
        }

        let mean = centroid(&self.keypoints);
        let n = self.keypoints.len() as f32;
        let (xx, xy, yy) = self.keypoints.iter().fold((0.0, 0.0, 0.0), |(xx, xy, yy), p| {
            let (dx, dy) = (p.x - mean.x, p.y - mean.y);
            (xx + dx * dx, xy + dx * dy, yy + dy * dy)
        });
        let (xx, xy, yy) = (xx / n, xy / n, yy / n);

        let half_trace = (xx + yy) * 0.5;
        let det = xx * yy - xy * xy;
        let lambda = (half_trace + (half_trace * half_trace - det).max(0.0).sqrt()).max(1e-6);
        let (vx, vy) = if xy.abs() > 1e-6 {
            (lambda - yy, xy)
        } else if xx >= yy {
            (1.0, 0.0)
        } else {
            (0.0, 1.0)
        };

        vy.atan2(vx) - PI * 0.5
    }
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len().max(1) as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

pub struct PalmDetector {
    session: Session,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn load(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load palm detector from {}", model_path.display()))?;

        Ok(Self { session, cfg })
    }

    /// Palms in the frame, best score first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let boxed = letterbox_frame(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(boxed.to_nhwc_unit()?)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;
        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let feature_dim = boxes
            .shape()
            .last()
            .copied()
            .ok_or_else(|| anyhow!("palm boxes have no shape"))?;

        decode_palms(
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            feature_dim,
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            &boxed.letterbox,
            &self.cfg,
        )
    }
}

/// Decodes raw SSD regressions. Offsets are in model pixels relative to the anchor
/// center: box `[dx, dy, w, h]` followed by seven keypoint `[dx, dy]` pairs.
fn decode_palms(
    boxes: &[f32],
    feature_dim: usize,
    scores: &[f32],
    letterbox: &Letterbox,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    if feature_dim < 4 + PALM_KEYPOINTS * 2 {
        return Err(anyhow!("palm box feature dimension too small: {feature_dim}"));
    }
    let anchors = NUM_ANCHORS
        .min(scores.len())
        .min(boxes.len() / feature_dim);

    let input = PALM_INPUT_SIZE as f32;
    let to_frame = |anchor: [f32; 2], dx: f32, dy: f32| {
        letterbox.unmap(anchor[0] * input + dx, anchor[1] * input + dy)
    };

    let mut candidates = Vec::new();
    for (idx, anchor) in ANCHORS.iter().copied().enumerate().take(anchors) {
        let score = sigmoid(scores[idx]);
        if score < cfg.score_threshold {
            continue;
        }

        let raw = &boxes[idx * feature_dim..(idx + 1) * feature_dim];
        let (half_w, half_h) = (raw[2] * 0.5, raw[3] * 0.5);
        let top_left = to_frame(anchor, raw[0] - half_w, raw[1] - half_h);
        let bottom_right = to_frame(anchor, raw[0] + half_w, raw[1] + half_h);
        if bottom_right.x <= top_left.x || bottom_right.y <= top_left.y {
            continue;
        }

        let keypoints = raw[4..4 + PALM_KEYPOINTS * 2]
            .chunks_exact(2)
            .map(|kp| to_frame(anchor, kp[0], kp[1]))
            .collect();

        candidates.push(PalmRegion {
            bbox: [top_left.x, top_left.y, bottom_right.x, bottom_right.y],
            keypoints,
            score,
        });
    }

    let boxes: Vec<[f32; 4]> = candidates.iter().map(|c| c.bbox).collect();
    let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    Ok(nms(&boxes, &scores, cfg.nms_threshold, cfg.top_k)
        .into_iter()
        .map(|idx| candidates[idx].clone())
        .collect())
}
