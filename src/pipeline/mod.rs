pub mod camera;
pub mod landmarks;
pub mod rgba_converter;

pub use camera::{
    CameraConstraints, CameraSource, CameraStream, DefaultCamera, FacingMode, FrameSinks,
    default_camera,
};
pub use landmarks::{DetectorFactory, LandmarkSource, OrtDetectorFactory, TrackingTarget};
