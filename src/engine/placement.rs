//! Maps a jewelry category and the latest landmark estimate to the rectangles the
//! jewelry bitmap is drawn into. Everything here is pure: the same inputs always give
//! the same rectangles, whatever was detected on earlier frames.

use crate::types::{FaceEstimate, HandEstimate, JewelryCategory, LandmarkEstimate, PlacementRect};

const EARRING_WIDTH_OF_FACE: f32 = 0.25;
const EARRING_ASPECT: f32 = 1.4;
const EARRING_DROP_PX: f32 = 10.0;
const EARRING_FALLBACK_SIZE: f32 = 0.15;
const EARRING_FALLBACK_ASPECT: f32 = 1.2;
const EARRING_FALLBACK_SPREAD: f32 = 0.18;
const EARRING_FALLBACK_RISE: f32 = 0.05;

const NECKLACE_WIDTH_OF_FACE: f32 = 1.8;
const NECKLACE_ASPECT: f32 = 0.35;
const NECKLACE_FALLBACK_WIDTH: f32 = 0.4;
const NECKLACE_FALLBACK_ASPECT: f32 = 0.3;
const NECKLACE_FALLBACK_DROP: f32 = 0.1;

const RING_SIDE_OF_HAND: f32 = 0.35;
const RING_FALLBACK_SIDE: f32 = 0.12;
const RING_FALLBACK_DROP: f32 = 0.15;

const BANGLE_WIDTH_OF_HAND: f32 = 1.5;
const BANGLE_ASPECT: f32 = 0.35;
const BANGLE_FALLBACK_WIDTH: f32 = 0.25;
const BANGLE_FALLBACK_ASPECT: f32 = 0.4;
const BANGLE_FALLBACK_DROP: f32 = 0.1;

/// Destination rectangles for `category` on a `canvas_width` x `canvas_height` surface.
///
/// Earrings always yield two rectangles (left first), every other category one.
/// An estimate of the wrong kind for the category counts as "not detected".
pub fn place(
    category: JewelryCategory,
    estimate: &LandmarkEstimate,
    canvas_width: f32,
    canvas_height: f32,
) -> Vec<PlacementRect> {
    let face = match estimate {
        LandmarkEstimate::Face(face) if face.detected => Some(face),
        _ => None,
    };
    let hand = match estimate {
        LandmarkEstimate::Hand(hand) if hand.detected => Some(hand),
        _ => None,
    };

    match category {
        JewelryCategory::Earrings => face
            .and_then(tracked_earrings)
            .unwrap_or_else(|| fallback_earrings(canvas_width, canvas_height))
            .to_vec(),
        JewelryCategory::Necklaces => vec![
            face.and_then(tracked_necklace)
                .unwrap_or_else(|| fallback_necklace(canvas_width, canvas_height)),
        ],
        JewelryCategory::Rings => vec![
            hand.and_then(tracked_ring)
                .unwrap_or_else(|| fallback_ring(canvas_width, canvas_height)),
        ],
        JewelryCategory::Bangles => vec![
            hand.and_then(tracked_bangle)
                .unwrap_or_else(|| fallback_bangle(canvas_width, canvas_height)),
        ],
    }
}

/// Feedback line for the UI. `fallback_mode` is set when the landmark model failed to
/// load, in which case nothing will ever be detected.
pub fn status_text(category: JewelryCategory, detected: bool, fallback_mode: bool) -> String {
    if fallback_mode {
        return "Using fallback mode".to_string();
    }

    match (category, detected) {
        (JewelryCategory::Earrings, true) => "Face detected: tracking ears".to_string(),
        (JewelryCategory::Necklaces, true) => "Face detected: tracking neckline".to_string(),
        (JewelryCategory::Rings, true) => "Hand detected: tracking ring finger".to_string(),
        (JewelryCategory::Bangles, true) => "Hand detected: tracking wrist".to_string(),
        (JewelryCategory::Earrings | JewelryCategory::Necklaces, false) => {
            "Position your face in frame".to_string()
        }
        (JewelryCategory::Rings | JewelryCategory::Bangles, false) => {
            format!("Show your hand to try on {}", category.item_noun())
        }
    }
}

fn scale_reference(width: Option<f32>) -> Option<f32> {
    width.filter(|w| w.is_finite() && *w > 0.0)
}

fn tracked_earrings(face: &FaceEstimate) -> Option<[PlacementRect; 2]> {
    let left = face.left_ear?;
    let right = face.right_ear?;
    let face_width = scale_reference(face.face_width)?;

    let width = face_width * EARRING_WIDTH_OF_FACE;
    let height = width * EARRING_ASPECT;
    let at_ear = |x: f32, y: f32| PlacementRect {
        x: x - width / 2.0,
        y: y + EARRING_DROP_PX,
        width,
        height,
    };

    Some([at_ear(left.x, left.y), at_ear(right.x, right.y)])
}

fn fallback_earrings(canvas_width: f32, canvas_height: f32) -> [PlacementRect; 2] {
    let width = canvas_width.min(canvas_height) * EARRING_FALLBACK_SIZE;
    let height = width * EARRING_FALLBACK_ASPECT;
    let center_x = canvas_width / 2.0;
    let offset = canvas_width * EARRING_FALLBACK_SPREAD;
    let y = canvas_height / 2.0 - canvas_height * EARRING_FALLBACK_RISE;
    let centered_at = |cx: f32| PlacementRect {
        x: cx - width / 2.0,
        y,
        width,
        height,
    };

    [centered_at(center_x - offset), centered_at(center_x + offset)]
}

fn tracked_necklace(face: &FaceEstimate) -> Option<PlacementRect> {
    let chin = face.chin?;
    let neck_base = face.neck_base?;
    let face_width = scale_reference(face.face_width)?;

    let width = face_width * NECKLACE_WIDTH_OF_FACE;
    Some(PlacementRect {
        x: chin.x - width / 2.0,
        y: neck_base.y,
        width,
        height: width * NECKLACE_ASPECT,
    })
}

fn fallback_necklace(canvas_width: f32, canvas_height: f32) -> PlacementRect {
    let width = canvas_width * NECKLACE_FALLBACK_WIDTH;
    PlacementRect {
        x: canvas_width / 2.0 - width / 2.0,
        y: canvas_height / 2.0 + canvas_height * NECKLACE_FALLBACK_DROP,
        width,
        height: width * NECKLACE_FALLBACK_ASPECT,
    }
}

fn tracked_ring(hand: &HandEstimate) -> Option<PlacementRect> {
    let anchor = hand.ring_finger_base?;
    let hand_width = scale_reference(hand.hand_width)?;

    let side = hand_width * RING_SIDE_OF_HAND;
    Some(PlacementRect {
        x: anchor.x - side / 2.0,
        y: anchor.y - side / 3.0,
        width: side,
        height: side,
    })
}

fn fallback_ring(canvas_width: f32, canvas_height: f32) -> PlacementRect {
    let side = canvas_width.min(canvas_height) * RING_FALLBACK_SIDE;
    PlacementRect {
        x: canvas_width / 2.0 - side / 2.0,
        y: canvas_height / 2.0 + canvas_height * RING_FALLBACK_DROP,
        width: side,
        height: side,
    }
}

fn tracked_bangle(hand: &HandEstimate) -> Option<PlacementRect> {
    let wrist = hand.wrist?;
    let hand_width = scale_reference(hand.hand_width)?;

    let width = hand_width * BANGLE_WIDTH_OF_HAND;
    let height = width * BANGLE_ASPECT;
    Some(PlacementRect {
        x: wrist.x - width / 2.0,
        y: wrist.y - height / 2.0,
        width,
        height,
    })
}

fn fallback_bangle(canvas_width: f32, canvas_height: f32) -> PlacementRect {
    let width = canvas_width.min(canvas_height) * BANGLE_FALLBACK_WIDTH;
    PlacementRect {
        x: canvas_width / 2.0 - width / 2.0,
        y: canvas_height / 2.0 + canvas_height * BANGLE_FALLBACK_DROP,
        width,
        height: width * BANGLE_FALLBACK_ASPECT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Handedness, Point};

    const EPS: f32 = 1e-3;

    fn center_x(rect: &PlacementRect) -> f32 {
        rect.x + rect.width / 2.0
    }

    fn center_y(rect: &PlacementRect) -> f32 {
        rect.y + rect.height / 2.0
    }

    fn assert_rect(actual: &PlacementRect, expected: (f32, f32, f32, f32)) {
        let (x, y, w, h) = expected;
        assert!(
            (actual.x - x).abs() < EPS
                && (actual.y - y).abs() < EPS
                && (actual.width - w).abs() < EPS
                && (actual.height - h).abs() < EPS,
            "got {actual:?}, expected x={x} y={y} w={w} h={h}"
        );
    }

    fn face(left: (f32, f32), right: (f32, f32), width: f32) -> LandmarkEstimate {
        LandmarkEstimate::Face(FaceEstimate {
            detected: true,
            left_ear: Some(left.into()),
            right_ear: Some(right.into()),
            chin: Some(Point::new((left.0 + right.0) / 2.0, left.1 + 80.0)),
            neck_base: Some(Point::new((left.0 + right.0) / 2.0, left.1 + 120.0)),
            face_width: Some(width),
        })
    }

    fn hand(anchor: (f32, f32), width: f32) -> LandmarkEstimate {
        LandmarkEstimate::Hand(HandEstimate {
            detected: true,
            wrist: Some(anchor.into()),
            ring_finger_base: Some(anchor.into()),
            hand_width: Some(width),
            handedness: Some(Handedness::Right),
        })
    }

    #[test]
    fn ring_on_detected_hand() {
        let rects = place(JewelryCategory::Rings, &hand((400.0, 300.0), 200.0), 1280.0, 720.0);
        assert_eq!(rects.len(), 1);
        assert_rect(&rects[0], (365.0, 300.0 - 70.0 / 3.0, 70.0, 70.0));
    }

    #[test]
    fn necklace_fallback_on_800_by_600() {
        let estimate = LandmarkEstimate::face_not_detected();
        let rects = place(JewelryCategory::Necklaces, &estimate, 800.0, 600.0);
        assert_eq!(rects.len(), 1);
        assert_rect(&rects[0], (240.0, 360.0, 320.0, 96.0));
    }

    #[test]
    fn fallback_ignores_previous_detections() {
        let sizes = [(640.0, 480.0), (1280.0, 720.0), (333.0, 999.0)];
        for category in JewelryCategory::ALL {
            for (w, h) in sizes {
                let cold = place(category, &LandmarkEstimate::Absent, w, h);
                // A detected frame in between must leave no trace on the next fallback.
                let _ = place(category, &face((100.0, 100.0), (300.0, 100.0), 200.0), w, h);
                let _ = place(category, &hand((200.0, 200.0), 150.0), w, h);
                let after_face = place(category, &LandmarkEstimate::face_not_detected(), w, h);
                let after_hand = place(category, &LandmarkEstimate::hand_not_detected(), w, h);
                assert_eq!(cold, after_face, "{category} at {w}x{h}");
                assert_eq!(cold, after_hand, "{category} at {w}x{h}");
            }
        }
    }

    #[test]
    fn earrings_scale_with_face_width_and_stay_centered() {
        let anchors = [((120.0, 200.0), (380.0, 210.0)), ((10.5, 50.0), (90.25, 48.0))];
        for (left, right) in anchors {
            for width in [40.0, 100.0, 237.5] {
                let single = place(JewelryCategory::Earrings, &face(left, right, width), 640.0, 480.0);
                let double =
                    place(JewelryCategory::Earrings, &face(left, right, width * 2.0), 640.0, 480.0);
                assert_eq!(single.len(), 2);
                assert_eq!(double.len(), 2);

                for ((one, two), anchor) in single.iter().zip(&double).zip([left, right]) {
                    assert!((two.width - one.width * 2.0).abs() < EPS);
                    assert!((two.height - one.height * 2.0).abs() < EPS);
                    assert!((center_x(one) - anchor.0).abs() < EPS);
                    assert!((center_x(two) - anchor.0).abs() < EPS);
                    assert!((one.y - (anchor.1 + 10.0)).abs() < EPS);
                }
            }
        }
    }

    #[test]
    fn earring_fallback_is_mirror_symmetric() {
        for (w, h) in [(640.0, 480.0), (1280.0, 720.0), (480.0, 640.0), (801.0, 599.0)] {
            let rects = place(JewelryCategory::Earrings, &LandmarkEstimate::Absent, w, h);
            assert_eq!(rects.len(), 2);
            let offset = w * 0.18;
            assert!((center_x(&rects[0]) - (w / 2.0 - offset)).abs() < EPS);
            assert!((center_x(&rects[1]) - (w / 2.0 + offset)).abs() < EPS);
            assert_eq!(rects[0].width, rects[1].width);
            assert_eq!(rects[0].y, rects[1].y);
            assert!((rects[0].width - w.min(h) * 0.15).abs() < EPS);
            assert!((rects[0].height - rects[0].width * 1.2).abs() < EPS);
        }
    }

    #[test]
    fn bangle_is_centered_on_wrist() {
        let rects = place(JewelryCategory::Bangles, &hand((500.0, 400.0), 100.0), 1280.0, 720.0);
        assert_rect(&rects[0], (425.0, 373.75, 150.0, 52.5));
        assert!((center_x(&rects[0]) - 500.0).abs() < EPS);
        assert!((center_y(&rects[0]) - 400.0).abs() < EPS);
    }

    #[test]
    fn bangle_and_ring_fallbacks() {
        let ring = place(JewelryCategory::Rings, &LandmarkEstimate::Absent, 800.0, 600.0);
        assert_rect(&ring[0], (364.0, 390.0, 72.0, 72.0));

        let bangle = place(JewelryCategory::Bangles, &LandmarkEstimate::Absent, 800.0, 600.0);
        assert_rect(&bangle[0], (325.0, 360.0, 150.0, 60.0));
    }

    #[test]
    fn necklace_hangs_from_neck_base() {
        let estimate = LandmarkEstimate::Face(FaceEstimate {
            detected: true,
            chin: Some(Point::new(320.0, 300.0)),
            neck_base: Some(Point::new(322.0, 340.0)),
            face_width: Some(200.0),
            ..Default::default()
        });
        let rects = place(JewelryCategory::Necklaces, &estimate, 640.0, 480.0);
        assert_rect(&rects[0], (140.0, 340.0, 360.0, 126.0));
    }

    #[test]
    fn missing_or_invalid_scale_falls_back() {
        let mut estimate = face((100.0, 100.0), (300.0, 100.0), 0.0);
        let fallback = place(JewelryCategory::Earrings, &LandmarkEstimate::Absent, 640.0, 480.0);
        assert_eq!(place(JewelryCategory::Earrings, &estimate, 640.0, 480.0), fallback);

        if let LandmarkEstimate::Face(face) = &mut estimate {
            face.face_width = Some(f32::NAN);
        }
        assert_eq!(place(JewelryCategory::Earrings, &estimate, 640.0, 480.0), fallback);

        if let LandmarkEstimate::Face(face) = &mut estimate {
            face.face_width = Some(120.0);
            face.right_ear = None;
        }
        assert_eq!(place(JewelryCategory::Earrings, &estimate, 640.0, 480.0), fallback);
    }

    #[test]
    fn wrong_estimate_kind_is_not_detected() {
        let rects = place(JewelryCategory::Rings, &face((1.0, 1.0), (2.0, 2.0), 50.0), 800.0, 600.0);
        let fallback = place(JewelryCategory::Rings, &LandmarkEstimate::Absent, 800.0, 600.0);
        assert_eq!(rects, fallback);
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            status_text(JewelryCategory::Earrings, true, false),
            "Face detected: tracking ears"
        );
        assert_eq!(
            status_text(JewelryCategory::Necklaces, false, false),
            "Position your face in frame"
        );
        assert_eq!(
            status_text(JewelryCategory::Rings, false, false),
            "Show your hand to try on ring"
        );
        assert_eq!(
            status_text(JewelryCategory::Bangles, false, false),
            "Show your hand to try on bangle"
        );
        assert_eq!(status_text(JewelryCategory::Rings, true, true), "Using fallback mode");
    }
}
