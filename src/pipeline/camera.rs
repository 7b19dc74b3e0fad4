use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::{error::CameraError, types::Frame};

/// Frames go to the landmark worker at most this often; the preview gets all of them.
pub const DETECTOR_FRAME_INTERVAL: Duration = Duration::from_millis(66);

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum FacingMode {
    /// The camera looking at the user.
    User,
    Environment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing: FacingMode::User,
        }
    }
}

/// Where a running camera delivers its frames.
#[derive(Clone, Debug)]
pub struct FrameSinks {
    /// The newest decoded frame, for the preview and capture.
    pub video: Sender<Frame>,
    /// Second handle on the video queue; evicts the stale frame when it is full.
    pub video_backlog: Receiver<Frame>,
    /// Throttled copies for landmark detection. Dropped when the worker is busy.
    pub detector: Sender<Frame>,
}

impl FrameSinks {
    /// Single-slot queues. Returns the sinks plus the video and detector receivers.
    pub fn channels() -> (Self, Receiver<Frame>, Receiver<Frame>) {
        let (video, video_rx) = bounded(1);
        let (detector, detector_rx) = bounded(1);
        let sinks = Self {
            video,
            video_backlog: video_rx.clone(),
            detector,
        };
        (sinks, video_rx, detector_rx)
    }

    /// Forwards a frame without ever blocking the capture loop.
    pub fn deliver(&self, frame: Frame, last_detector_send: &mut Option<Instant>) {
        let due = last_detector_send.is_none_or(|at| at.elapsed() >= DETECTOR_FRAME_INTERVAL);
        if due && self.detector.try_send(frame.clone()).is_ok() {
            *last_detector_send = Some(Instant::now());
        }
        if let Err(TrySendError::Full(frame)) = self.video.try_send(frame) {
            let _ = self.video_backlog.try_recv();
            let _ = self.video.try_send(frame);
        }
    }
}

/// Something that can be turned into a live camera stream.
pub trait CameraSource {
    fn acquire(
        &mut self,
        constraints: &CameraConstraints,
        sinks: FrameSinks,
    ) -> Result<CameraStream, CameraError>;
}

/// A running capture thread. Stopping (or dropping) releases the device.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    /// Runs `capture` on its own thread; it must return once the flag reads true.
    pub fn spawn<F>(capture: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || capture(stop_flag));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("camera capture thread panicked");
            }
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Used when the binary is built without a capture backend.
#[derive(Clone, Debug, Default)]
pub struct NoCamera;

impl CameraSource for NoCamera {
    fn acquire(
        &mut self,
        _constraints: &CameraConstraints,
        _sinks: FrameSinks,
    ) -> Result<CameraStream, CameraError> {
        Err(CameraError::Unavailable(
            "built without a camera backend".to_string(),
        ))
    }
}

#[cfg(feature = "camera-nokhwa")]
pub use native::NokhwaCamera;

#[cfg(feature = "camera-nokhwa")]
pub type DefaultCamera = NokhwaCamera;
#[cfg(not(feature = "camera-nokhwa"))]
pub type DefaultCamera = NoCamera;

pub fn default_camera(index: u32) -> DefaultCamera {
    #[cfg(feature = "camera-nokhwa")]
    {
        NokhwaCamera::new(index)
    }
    #[cfg(not(feature = "camera-nokhwa"))]
    {
        log::warn!("camera {index} requested but no camera backend is compiled in");
        NoCamera
    }
}

#[cfg(feature = "camera-nokhwa")]
mod native {
    use std::{sync::atomic::Ordering, time::Instant};

    use crossbeam_channel::bounded;
    use nokhwa::{
        Camera, NokhwaError,
        pixel_format::RgbFormat,
        query,
        utils::{
            ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
            RequestedFormatType,
        },
    };

    use super::{CameraConstraints, CameraSource, CameraStream, FacingMode, FrameSinks};
    use crate::{error::CameraError, pipeline::rgba_converter};

    // Built-in macOS cameras often reject YUYV even though it is reported.
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::MJPEG,
        FrameFormat::NV12,
        FrameFormat::YUYV,
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::GRAY,
    ];

    fn requested_formats(constraints: &CameraConstraints) -> [RequestedFormat<'static>; 4] {
        let ideal = CameraFormat::new_from(
            constraints.ideal_width,
            constraints.ideal_height,
            FrameFormat::MJPEG,
            30,
        );
        [
            RequestedFormat::with_formats(
                RequestedFormatType::Closest(ideal),
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestFrameRate,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    /// A camera opened through nokhwa. The user-facing camera is the configured index.
    #[derive(Clone, Debug)]
    pub struct NokhwaCamera {
        index: u32,
    }

    impl NokhwaCamera {
        pub fn new(index: u32) -> Self {
            Self { index }
        }
    }

    fn classify(err: NokhwaError) -> CameraError {
        let detail = err.to_string();
        let lowered = detail.to_ascii_lowercase();
        if ["permission", "denied", "not authorized", "unauthorized"]
            .iter()
            .any(|needle| lowered.contains(needle))
        {
            CameraError::PermissionDenied(detail)
        } else {
            CameraError::Open(detail)
        }
    }

    fn build_camera(
        index: &CameraIndex,
        constraints: &CameraConstraints,
    ) -> Result<Camera, CameraError> {
        let mut last_err = None;
        for requested in requested_formats(constraints) {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(classify(err)),
                },
                Err(err) => last_err = Some(classify(err)),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CameraError::Open("no supported capture format".to_string())
        }))
    }

    impl CameraSource for NokhwaCamera {
        fn acquire(
            &mut self,
            constraints: &CameraConstraints,
            sinks: FrameSinks,
        ) -> Result<CameraStream, CameraError> {
            let devices = query(ApiBackend::Auto).map_err(classify)?;
            if devices.is_empty() {
                return Err(CameraError::Unavailable(
                    "no video input devices were found".to_string(),
                ));
            }

            if constraints.facing == FacingMode::Environment {
                log::warn!(
                    "camera facing is not reported by this backend, using camera {}",
                    self.index
                );
            }

            // The device handle is not Send, so it is opened on the capture thread and
            // the outcome reported back before `acquire` returns.
            let index = CameraIndex::Index(self.index);
            let constraints = constraints.clone();
            let (ready_tx, ready_rx) = bounded::<Result<(), CameraError>>(1);
            let stream = CameraStream::spawn(move |stop| {
                let mut camera = match build_camera(&index, &constraints) {
                    Ok(camera) => camera,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let format = camera.camera_format();
                log::info!(
                    "camera {index} streaming {}x{} {:?} @ {} fps",
                    format.width(),
                    format.height(),
                    format.format(),
                    format.frame_rate()
                );
                let _ = ready_tx.send(Ok(()));

                let mut last_detector_send: Option<Instant> = None;
                while !stop.load(Ordering::Relaxed) {
                    let buffer = match camera.frame() {
                        Ok(buffer) => buffer,
                        Err(err) => {
                            log::warn!("camera frame read failed: {err:?}");
                            continue;
                        }
                    };
                    match rgba_converter::convert_camera_frame(&buffer) {
                        Ok(frame) => sinks.deliver(frame, &mut last_detector_send),
                        Err(err) => log::warn!("failed to decode camera frame: {err:?}"),
                    }
                }
                if let Err(err) = camera.stop_stream() {
                    log::warn!("failed to stop camera stream: {err:?}");
                }
            });

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(stream),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(CameraError::Open(
                    "capture thread exited before the camera opened".to_string(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn frame(width: u32) -> Frame {
        Frame::new(vec![0; (width * 4) as usize], width, 1)
    }

    #[test]
    fn stopping_joins_the_capture_thread() {
        let live = Arc::new(AtomicUsize::new(0));
        let counter = live.clone();
        let stream = CameraStream::spawn(move |stop| {
            counter.fetch_add(1, Ordering::SeqCst);
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
            counter.fetch_sub(1, Ordering::SeqCst);
        });
        stream.stop();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn detector_sink_is_throttled_and_never_blocks() {
        let (sinks, video_rx, detector_rx) = FrameSinks::channels();

        let mut last = None;
        for _ in 0..3 {
            sinks.deliver(frame(1), &mut last);
        }
        assert_eq!(video_rx.len(), 1);
        assert_eq!(detector_rx.len(), 1);

        // A full detector queue does not count as a send.
        let before = Some(Instant::now() - DETECTOR_FRAME_INTERVAL * 2);
        let mut last = before;
        sinks.deliver(frame(1), &mut last);
        assert_eq!(last, before);

        detector_rx.try_recv().unwrap();
        sinks.deliver(frame(1), &mut last);
        assert_eq!(detector_rx.len(), 1);
        assert_ne!(last, before);
    }

    #[test]
    fn slow_consumer_sees_the_newest_frame() {
        let (sinks, video_rx, _detector_rx) = FrameSinks::channels();
        let mut last = None;
        for width in 1..=4 {
            sinks.deliver(frame(width), &mut last);
        }
        assert_eq!(video_rx.len(), 1);
        assert_eq!(video_rx.try_recv().unwrap().width, 4);
    }

    #[test]
    fn no_camera_reports_unavailable() {
        let (sinks, _video_rx, _detector_rx) = FrameSinks::channels();
        let result = NoCamera.acquire(&CameraConstraints::default(), sinks);
        assert!(matches!(result, Err(CameraError::Unavailable(_))));
    }
}
