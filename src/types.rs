use std::{fmt, str::FromStr};

use image::RgbaImage;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
        }
    }

    /// Copy the pixels into an `image` buffer. `None` when the buffer length does not
    /// match the dimensions.
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.rgba.is_empty()
    }
}

/// A position in the native pixel space of the video frame (never mirrored).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn from_score(score: f32) -> Option<Self> {
        if score >= 0.5 {
            Some(Handedness::Right)
        } else if score > 0.0 {
            Some(Handedness::Left)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceEstimate {
    pub detected: bool,
    pub left_ear: Option<Point>,
    pub right_ear: Option<Point>,
    pub chin: Option<Point>,
    pub neck_base: Option<Point>,
    pub face_width: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandEstimate {
    pub detected: bool,
    pub wrist: Option<Point>,
    pub ring_finger_base: Option<Point>,
    pub hand_width: Option<f32>,
    pub handedness: Option<Handedness>,
}

/// The latest output of a landmark source. `Absent` is the value before the
/// first detection cycle has finished and reads as "not detected".
#[derive(Clone, Debug, Default, PartialEq)]
pub enum LandmarkEstimate {
    #[default]
    Absent,
    Face(FaceEstimate),
    Hand(HandEstimate),
}

impl LandmarkEstimate {
    pub fn detected(&self) -> bool {
        match self {
            LandmarkEstimate::Absent => false,
            LandmarkEstimate::Face(face) => face.detected,
            LandmarkEstimate::Hand(hand) => hand.detected,
        }
    }

    pub fn face_not_detected() -> Self {
        LandmarkEstimate::Face(FaceEstimate::default())
    }

    pub fn hand_not_detected() -> Self {
        LandmarkEstimate::Hand(HandEstimate::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JewelryCategory {
    Earrings,
    Necklaces,
    Rings,
    Bangles,
}

impl JewelryCategory {
    pub const ALL: [JewelryCategory; 4] = [
        JewelryCategory::Earrings,
        JewelryCategory::Necklaces,
        JewelryCategory::Rings,
        JewelryCategory::Bangles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JewelryCategory::Earrings => "earrings",
            JewelryCategory::Necklaces => "necklaces",
            JewelryCategory::Rings => "rings",
            JewelryCategory::Bangles => "bangles",
        }
    }

    /// Singular noun used in user-facing prompts ("try on ring").
    pub fn item_noun(&self) -> &'static str {
        match self {
            JewelryCategory::Earrings => "earrings",
            JewelryCategory::Necklaces => "necklace",
            JewelryCategory::Rings => "ring",
            JewelryCategory::Bangles => "bangle",
        }
    }
}

impl fmt::Display for JewelryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JewelryCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        let wanted = wanted.trim_end_matches('s');
        JewelryCategory::ALL
            .into_iter()
            .find(|category| category.as_str().trim_end_matches('s') == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = JewelryCategory::ALL.iter().map(|c| c.as_str()).collect();
                format!(
                    "unknown jewelry category `{}` (expected one of {})",
                    value.trim(),
                    known.join(", ")
                )
            })
    }
}

/// The catalog item being tried on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JewelryAsset {
    pub image_url: String,
    pub category: JewelryCategory,
    pub name: String,
}

/// Destination rectangle for one jewelry draw, in overlay (= video) pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlacementRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Error,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_singular_and_plural() {
        assert_eq!("Rings".parse::<JewelryCategory>(), Ok(JewelryCategory::Rings));
        assert_eq!("bangle".parse::<JewelryCategory>(), Ok(JewelryCategory::Bangles));
        assert_eq!(" necklaces ".parse::<JewelryCategory>(), Ok(JewelryCategory::Necklaces));
        assert!("tiara".parse::<JewelryCategory>().is_err());
    }

    #[test]
    fn absent_estimate_is_not_detected() {
        assert!(!LandmarkEstimate::default().detected());
        assert!(!LandmarkEstimate::hand_not_detected().detected());
    }

    #[test]
    fn handedness_threshold() {
        assert_eq!(Handedness::from_score(0.9), Some(Handedness::Right));
        assert_eq!(Handedness::from_score(0.2), Some(Handedness::Left));
        assert_eq!(Handedness::from_score(0.0), None);
    }
}
