use std::{io, path::PathBuf};

use thiserror::Error;

/// Camera acquisition failures. These are the only errors that move a session
/// into the `Error` state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera access was denied: {0}")]
    PermissionDenied(String),
    #[error("no camera is available: {0}")]
    Unavailable(String),
    #[error("failed to open camera: {0}")]
    Open(String),
}

impl CameraError {
    /// Message shown next to the retry affordance.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied(_) => {
                "Camera permission denied. Allow camera access and try again.".to_string()
            }
            CameraError::Unavailable(_) => {
                "No camera found. Connect a camera and try again.".to_string()
            }
            CameraError::Open(detail) => format!("Could not start the camera: {detail}"),
        }
    }
}

/// Landmark model loading failures; the session keeps running with fallback placement.
#[derive(Error, Debug)]
pub enum DetectorInitError {
    #[error("model file not found: {}", .0.display())]
    ModelMissing(PathBuf),
    #[error("failed to load landmark model: {0:#}")]
    Load(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("failed to fetch jewelry image from {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("failed to decode jewelry image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to encode capture: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write capture to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
