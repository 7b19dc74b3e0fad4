use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    LandmarkEngine,
    common::RotatedCrop,
    palm::{PalmDetector, PalmDetectorConfig, PalmRegion},
};
use crate::types::{Frame, HandEstimate, Handedness, LandmarkEstimate, Point};

const HANDPOSE_INPUT_SIZE: u32 = 224;
const NUM_LANDMARKS: usize = 21;
const MIN_HAND_CONFIDENCE: f32 = 0.5;

// MediaPipe hand topology.
const WRIST: usize = 0;
const INDEX_MCP: usize = 5;
const RING_MCP: usize = 13;
const PINKY_MCP: usize = 17;

/// Palm detection followed by 21-point handpose regression on a rotated crop.
pub struct HandLandmarkEngine {
    palm_detector: PalmDetector,
    handpose: Session,
}

impl HandLandmarkEngine {
    pub fn load(palm_model: &Path, handpose_model: &Path) -> Result<Self> {
        let palm_detector = PalmDetector::load(palm_model, PalmDetectorConfig::default())?;
        let handpose = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(handpose_model)
            .with_context(|| {
                format!("failed to load handpose model from {}", handpose_model.display())
            })?;

        Ok(Self {
            palm_detector,
            handpose,
        })
    }

    fn regress(&mut self, frame: &Frame, palm: &PalmRegion) -> Result<LandmarkEstimate> {
        let (center, side, angle) = palm.handpose_crop();
        let crop = RotatedCrop::new(frame, center, side, angle, HANDPOSE_INPUT_SIZE);
        let tensor = Tensor::from_array(crop.sample_nhwc(frame)?)?;

        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;
        if outputs.len() < 3 {
            return Err(anyhow!(
                "handpose model returned {} outputs, expected 3",
                outputs.len()
            ));
        }

        let coords: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let first = |idx: usize| -> Result<f32> {
            outputs[idx]
                .try_extract_array::<f32>()?
                .iter()
                .next()
                .copied()
                .ok_or_else(|| anyhow!("handpose output {idx} is empty"))
        };
        let confidence = first(1)? * palm.score;
        let handedness = first(2)?;

        if confidence < MIN_HAND_CONFIDENCE {
            return Ok(LandmarkEstimate::hand_not_detected());
        }

        let landmarks = project_landmarks(&coords, &crop)?;
        Ok(hand_estimate(&landmarks, handedness))
    }
}

impl LandmarkEngine for HandLandmarkEngine {
    fn estimate(&mut self, frame: &Frame) -> Result<LandmarkEstimate> {
        let palms = self.palm_detector.detect(frame)?;
        match palms.first() {
            Some(palm) => self.regress(frame, palm),
            None => Ok(LandmarkEstimate::hand_not_detected()),
        }
    }
}

/// Flat `[x, y, z] * 21` crop coordinates to frame pixels.
fn project_landmarks(coords: &[f32], crop: &RotatedCrop) -> Result<Vec<Point>> {
    if coords.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            coords.len(),
            NUM_LANDMARKS * 3
        ));
    }
    Ok(coords
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|xyz| crop.project(xyz[0], xyz[1]))
        .collect())
}

fn hand_estimate(landmarks: &[Point], handedness: f32) -> LandmarkEstimate {
    let hand_width = landmarks[INDEX_MCP].distance(&landmarks[PINKY_MCP]);
    if !hand_width.is_finite() || hand_width <= 0.0 {
        return LandmarkEstimate::hand_not_detected();
    }

    LandmarkEstimate::Hand(HandEstimate {
        detected: true,
        wrist: Some(landmarks[WRIST]),
        ring_finger_base: Some(landmarks[RING_MCP]),
        hand_width: Some(hand_width),
        handedness: Handedness::from_score(handedness),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks() -> Vec<Point> {
        (0..NUM_LANDMARKS)
            .map(|i| Point::new(100.0 + i as f32 * 10.0, 200.0))
            .collect()
    }

    #[test]
    fn estimate_uses_wrist_ring_base_and_knuckle_span() {
        let estimate = hand_estimate(&landmarks(), 0.8);
        let LandmarkEstimate::Hand(hand) = estimate else {
            panic!("expected a hand estimate");
        };
        assert!(hand.detected);
        assert_eq!(hand.wrist, Some(Point::new(100.0, 200.0)));
        assert_eq!(hand.ring_finger_base, Some(Point::new(230.0, 200.0)));
        assert_eq!(hand.hand_width, Some(120.0));
        assert_eq!(hand.handedness, Some(Handedness::Right));
    }

    #[test]
    fn collapsed_knuckles_are_not_a_detection() {
        let points = vec![Point::new(5.0, 5.0); NUM_LANDMARKS];
        assert!(!hand_estimate(&points, 0.8).detected());
    }

    #[test]
    fn projects_crop_coordinates() {
        let frame = Frame::new(vec![0; 400 * 400 * 4], 400, 400);
        let crop = RotatedCrop::new(&frame, Point::new(200.0, 200.0), 224.0, 0.0, 224);
        let mut coords = vec![112.0; NUM_LANDMARKS * 3];
        coords[0] = 0.0;
        let points = project_landmarks(&coords, &crop).unwrap();
        assert_eq!(points.len(), NUM_LANDMARKS);
        assert_eq!(points[0], Point::new(88.0, 200.0));
        assert_eq!(points[1], Point::new(200.0, 200.0));
        assert!(project_landmarks(&coords[..10], &crop).is_err());
    }
}
