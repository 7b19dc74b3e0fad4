use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    LandmarkEngine,
    common::{Letterbox, letterbox_frame, nms},
};
use crate::types::{FaceEstimate, Frame, LandmarkEstimate, Point};

const YUNET_INPUT_SIZE: u32 = 640;
const YUNET_STRIDES: [usize; 3] = [8, 16, 32];
const YUNET_SCORE_THRESHOLD: f32 = 0.6;
const YUNET_NMS_THRESHOLD: f32 = 0.3;
const YUNET_KEYPOINTS: usize = 5;

// Keypoint order of the model output.
const NOSE_TIP: usize = 2;
const MOUTH_RIGHT: usize = 3;
const MOUTH_LEFT: usize = 4;

/// Neck base sits this fraction of the face height below the chin.
const NECK_DROP_RATIO: f32 = 0.15;

/// Output slots for one stride: (cls, obj, bbox, kps).
type StrideOutputs = (usize, usize, usize, usize);

/// A face box with five keypoints, in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceDetection {
    pub bbox: [f32; 4],
    pub keypoints: [Point; YUNET_KEYPOINTS],
    pub score: f32,
}

impl FaceDetection {
    /// Ear, chin and neck anchors derived from the box and keypoints.
    ///
    /// Earlobes are taken at the box edges, level between nose tip and mouth; the
    /// chin is the box bottom under the mouth center. Ears are named by image side.
    pub fn to_estimate(&self) -> LandmarkEstimate {
        let [x1, y1, x2, y2] = self.bbox;
        let (width, height) = (x2 - x1, y2 - y1);
        if !(width > 0.0 && height > 0.0) {
            return LandmarkEstimate::face_not_detected();
        }

        let nose = self.keypoints[NOSE_TIP];
        let mouth = Point::new(
            (self.keypoints[MOUTH_RIGHT].x + self.keypoints[MOUTH_LEFT].x) * 0.5,
            (self.keypoints[MOUTH_RIGHT].y + self.keypoints[MOUTH_LEFT].y) * 0.5,
        );
        let ear_y = (nose.y + mouth.y) * 0.5;
        let chin = Point::new(mouth.x, y2);

        LandmarkEstimate::Face(FaceEstimate {
            detected: true,
            left_ear: Some(Point::new(x1, ear_y)),
            right_ear: Some(Point::new(x2, ear_y)),
            chin: Some(chin),
            neck_base: Some(Point::new(chin.x, chin.y + height * NECK_DROP_RATIO)),
            face_width: Some(width),
        })
    }
}

/// YuNet face detector.
pub struct FaceLandmarkEngine {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceLandmarkEngine {
    pub fn load(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load face detector from {}", model_path.display()))?;

        let names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if names.len() < 12 {
            return Err(anyhow!(
                "face detector needs 12 outputs (cls/obj/bbox/kps per stride), got {}",
                names.len()
            ));
        }
        let stride_outputs = discover_outputs(&names);
        log::debug!("face detector outputs {names:?} mapped as {stride_outputs:?}");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        let boxed = letterbox_frame(frame, YUNET_INPUT_SIZE)?;
        let tensor = Tensor::from_array(boxed.to_nchw_bgr()?)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face detector session")?;

        let mut faces = Vec::new();
        for (&stride, &(cls, obj, bbox, kps)) in YUNET_STRIDES.iter().zip(&self.stride_outputs) {
            let read = |idx: usize, what: &str| -> Result<Vec<f32>> {
                let (_, data) = outputs[idx]
                    .try_extract_tensor::<f32>()
                    .with_context(|| format!("{what} output for stride {stride}"))?;
                Ok(data.to_vec())
            };
            let tensors = StrideTensors {
                cls: &read(cls, "cls")?,
                obj: &read(obj, "obj")?,
                bbox: &read(bbox, "bbox")?,
                kps: &read(kps, "kps")?,
            };
            faces.extend(decode_stride(&tensors, stride, &boxed.letterbox));
        }

        let boxes: Vec<[f32; 4]> = faces.iter().map(|f| f.bbox).collect();
        let scores: Vec<f32> = faces.iter().map(|f| f.score).collect();
        Ok(nms(&boxes, &scores, YUNET_NMS_THRESHOLD, 5)
            .into_iter()
            .map(|idx| faces[idx].clone())
            .collect())
    }
}

impl LandmarkEngine for FaceLandmarkEngine {
    fn estimate(&mut self, frame: &Frame) -> Result<LandmarkEstimate> {
        Ok(self
            .detect(frame)?
            .first()
            .map(FaceDetection::to_estimate)
            .unwrap_or_else(LandmarkEstimate::face_not_detected))
    }
}

/// Name-based lookup (`cls_8`, `obj_16`, ...) with the stock export order as fallback.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let by_name: Option<Vec<StrideOutputs>> = YUNET_STRIDES
        .iter()
        .map(|&stride| {
            Some((
                find("cls", stride)?,
                find("obj", stride)?,
                find("bbox", stride)?,
                find("kps", stride)?,
            ))
        })
        .collect();

    match by_name {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            log::info!("face detector output names not recognized, using positional mapping");
            [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]
        }
    }
}

struct StrideTensors<'a> {
    cls: &'a [f32],
    obj: &'a [f32],
    bbox: &'a [f32],
    kps: &'a [f32],
}

/// Anchor-free decode: one prior per grid cell, offsets in stride units.
fn decode_stride(t: &StrideTensors<'_>, stride: usize, letterbox: &Letterbox) -> Vec<FaceDetection> {
    let cols = YUNET_INPUT_SIZE as usize / stride;
    let cells = (cols * cols)
        .min(t.cls.len())
        .min(t.obj.len())
        .min(t.bbox.len() / 4)
        .min(t.kps.len() / (YUNET_KEYPOINTS * 2));
    let s = stride as f32;

    let mut faces = Vec::new();
    for idx in 0..cells {
        let score = (t.cls[idx].clamp(0.0, 1.0) * t.obj[idx].clamp(0.0, 1.0)).sqrt();
        if score < YUNET_SCORE_THRESHOLD {
            continue;
        }

        let (col, row) = ((idx % cols) as f32, (idx / cols) as f32);
        let b = &t.bbox[idx * 4..idx * 4 + 4];
        let (cx, cy) = ((col + b[0]) * s, (row + b[1]) * s);
        let (w, h) = (b[2].exp() * s, b[3].exp() * s);
        let top_left = letterbox.unmap(cx - w * 0.5, cy - h * 0.5);
        let bottom_right = letterbox.unmap(cx + w * 0.5, cy + h * 0.5);

        let k = &t.kps[idx * YUNET_KEYPOINTS * 2..(idx + 1) * YUNET_KEYPOINTS * 2];
        let keypoints =
            std::array::from_fn(|n| letterbox.unmap((k[2 * n] + col) * s, (k[2 * n + 1] + row) * s));

        faces.push(FaceDetection {
            bbox: [top_left.x, top_left.y, bottom_right.x, bottom_right.y],
            keypoints,
            score,
        });
    }
    faces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            frame_w: YUNET_INPUT_SIZE,
            frame_h: YUNET_INPUT_SIZE,
        }
    }

    #[test]
    fn maps_outputs_by_name_in_any_order() {
        let names: Vec<String> = [
            "bbox_8", "bbox_16", "bbox_32", "cls_8", "cls_16", "cls_32", "kps_8", "kps_16",
            "kps_32", "obj_8", "obj_16", "obj_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            discover_outputs(&names),
            [(3, 9, 0, 6), (4, 10, 1, 7), (5, 11, 2, 8)]
        );

        let numeric: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        assert_eq!(discover_outputs(&numeric)[1], (1, 4, 7, 10));
    }

    #[test]
    fn decodes_one_cell_at_stride_32() {
        let cells = 20 * 20;
        let mut cls = vec![0.0; cells];
        let mut obj = vec![0.0; cells];
        let mut bbox = vec![0.0; cells * 4];
        let kps = vec![0.5; cells * 10];

        // Row 2, column 3.
        let idx = 2 * 20 + 3;
        cls[idx] = 0.9;
        obj[idx] = 0.9;
        bbox[idx * 4] = 0.5;
        bbox[idx * 4 + 1] = 0.5;
        let tensors = StrideTensors {
            cls: &cls,
            obj: &obj,
            bbox: &bbox,
            kps: &kps,
        };

        let faces = decode_stride(&tensors, 32, &identity_letterbox());
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert!((face.score - 0.9).abs() < 1e-5);
        // Center (112, 80), exp(0) * 32 = 32 wide.
        assert_eq!(face.bbox, [96.0, 64.0, 128.0, 96.0]);
        assert_eq!(face.keypoints[NOSE_TIP], Point::new(112.0, 80.0));
    }

    #[test]
    fn estimate_places_ears_chin_and_neck() {
        let face = FaceDetection {
            bbox: [100.0, 50.0, 300.0, 250.0],
            keypoints: [
                Point::new(150.0, 120.0),
                Point::new(250.0, 120.0),
                Point::new(200.0, 160.0),
                Point::new(170.0, 200.0),
                Point::new(230.0, 200.0),
            ],
            score: 0.95,
        };
        let LandmarkEstimate::Face(estimate) = face.to_estimate() else {
            panic!("expected a face estimate");
        };
        assert!(estimate.detected);
        assert_eq!(estimate.left_ear, Some(Point::new(100.0, 180.0)));
        assert_eq!(estimate.right_ear, Some(Point::new(300.0, 180.0)));
        assert_eq!(estimate.chin, Some(Point::new(200.0, 250.0)));
        assert_eq!(estimate.neck_base, Some(Point::new(200.0, 280.0)));
        assert_eq!(estimate.face_width, Some(200.0));
    }

    #[test]
    fn degenerate_box_is_not_a_detection() {
        let face = FaceDetection {
            bbox: [100.0, 50.0, 100.0, 250.0],
            keypoints: [Point::default(); YUNET_KEYPOINTS],
            score: 0.95,
        };
        assert!(!face.to_estimate().detected());
    }
}
