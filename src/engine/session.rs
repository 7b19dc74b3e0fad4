use std::path::PathBuf;

use crossbeam_channel::Receiver;
use image::RgbaImage;

use super::{
    capture::{self, CaptureJob},
    jewelry::JewelryBitmap,
    placement::status_text,
    render_loop::{RenderLoop, TickHandle, TickInput},
};
use crate::{
    error::CameraError,
    pipeline::{
        CameraConstraints, CameraSource, CameraStream, DetectorFactory, FrameSinks, LandmarkSource,
        TrackingTarget,
    },
    types::{Frame, JewelryAsset, LandmarkEstimate, SessionState},
};

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub constraints: CameraConstraints,
    pub mirrored: bool,
    pub export_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            constraints: CameraConstraints::default(),
            mirrored: true,
            export_dir: PathBuf::from("exports"),
        }
    }
}

/// Everything acquired by one successful `open()`. Restart builds a fresh one.
struct Generation {
    id: u64,
    camera: Option<CameraStream>,
    detector: Box<dyn LandmarkSource>,
    video_rx: Receiver<Frame>,
    video: Option<Frame>,
    render: RenderLoop,
    next_tick: Option<TickHandle>,
    fallback_mode: bool,
}

impl Generation {
    /// Render tick first, then the detector, then the camera.
    fn teardown(&mut self) {
        self.render.cancel();
        self.next_tick = None;
        self.detector.stop();
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }
        self.video = None;
    }

    fn latest_video(&mut self) -> Option<&Frame> {
        while let Ok(frame) = self.video_rx.try_recv() {
            self.video = Some(frame);
        }
        self.video.as_ref()
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Lifecycle of one try-on: camera, landmark source, render loop and capture for a
/// single jewelry asset.
pub struct TryOnSession<C: CameraSource, F: DetectorFactory> {
    asset: JewelryAsset,
    cameras: C,
    detectors: F,
    options: SessionOptions,
    state: SessionState,
    mirrored: bool,
    error: Option<CameraError>,
    jewelry: JewelryBitmap,
    generation: Option<Generation>,
    generations_opened: u64,
    status: String,
}

impl<C: CameraSource, F: DetectorFactory> TryOnSession<C, F> {
    pub fn new(asset: JewelryAsset, cameras: C, detectors: F, options: SessionOptions) -> Self {
        let mirrored = options.mirrored;
        Self {
            asset,
            cameras,
            detectors,
            options,
            state: SessionState::Idle,
            mirrored,
            error: None,
            jewelry: JewelryBitmap::new(),
            generation: None,
            generations_opened: 0,
            status: idle_status(),
        }
    }

    pub fn asset(&self) -> &JewelryAsset {
        &self.asset
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn error(&self) -> Option<&CameraError> {
        self.error.as_ref()
    }

    /// Status line for the UI; while active it is refreshed by every tick.
    pub fn status_text(&self) -> &str {
        &self.status
    }

    pub fn fallback_mode(&self) -> bool {
        self.generation.as_ref().is_some_and(|g| g.fallback_mode)
    }

    /// The jewelry image could not be fetched or decoded; nothing will be drawn.
    pub fn jewelry_failed(&self) -> bool {
        self.jewelry.has_failed()
    }

    pub fn tracking_target(&self) -> TrackingTarget {
        TrackingTarget::for_category(self.asset.category)
    }

    pub fn open(&mut self) {
        if self.state == SessionState::Active {
            return;
        }
        self.teardown_generation();
        self.error = None;
        self.state = SessionState::Initializing;
        self.status = "Starting camera...".to_string();

        let (sinks, video_rx, detector_rx) = FrameSinks::channels();
        let camera = match self.cameras.acquire(&self.options.constraints, sinks) {
            Ok(camera) => camera,
            Err(err) => {
                log::error!("camera unavailable: {err}");
                self.status = err.user_message();
                self.error = Some(err);
                self.state = SessionState::Error;
                return;
            }
        };

        // Opening again is the user's retry, so a failed image gets another attempt.
        if self.jewelry.has_failed() {
            self.jewelry.release();
        }
        if self.jewelry.is_idle() {
            log::debug!("loading jewelry image {}", self.asset.image_url);
            self.jewelry.ensure_loading(&self.asset.image_url);
        }

        let target = self.tracking_target();
        let mut detector = self.detectors.create(target);
        let fallback_mode = match detector.initialize() {
            Ok(()) => false,
            Err(err) => {
                log::warn!("{} tracking unavailable, using fallback placement: {err}", target.label());
                true
            }
        };
        detector.start(detector_rx);

        self.generations_opened += 1;
        let mut render = RenderLoop::new();
        let next_tick = Some(render.schedule());
        self.generation = Some(Generation {
            id: self.generations_opened,
            camera: Some(camera),
            detector,
            video_rx,
            video: None,
            render,
            next_tick,
            fallback_mode,
        });
        self.state = SessionState::Active;
        self.status = status_text(self.asset.category, false, fallback_mode);
        log::info!(
            "try-on session active for {} ({}), generation {}",
            self.asset.name,
            self.asset.category,
            self.generations_opened
        );
    }

    /// Runs the pending render tick, if any. Returns whether a tick ran.
    pub fn tick(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let jewelry = self.jewelry.poll().cloned();
        let Some(generation) = self.generation.as_mut() else {
            return false;
        };
        let Some(handle) = generation.next_tick.take() else {
            return false;
        };

        let frame_size = generation.latest_video().map(|f| (f.width, f.height));
        let estimate = generation.detector.current_estimate();
        generation.next_tick = generation.render.run_tick(
            &handle,
            TickInput {
                frame_size,
                category: self.asset.category,
                estimate: &estimate,
                jewelry: jewelry.as_ref(),
            },
        );
        self.status = status_text(self.asset.category, estimate.detected(), generation.fallback_mode);
        generation.next_tick.is_some()
    }

    pub fn toggle_mirror(&mut self) {
        self.set_mirror(!self.mirrored);
    }

    pub fn set_mirror(&mut self, mirrored: bool) {
        if self.state == SessionState::Active {
            self.mirrored = mirrored;
        }
    }

    pub fn restart_camera(&mut self) {
        log::info!("restarting camera");
        self.teardown_generation();
        self.state = SessionState::Idle;
        self.open();
    }

    /// Stops camera, detector and rendering but keeps the loaded jewelry image.
    pub fn stop_camera(&mut self) {
        self.teardown_generation();
        self.state = SessionState::Idle;
        self.error = None;
        self.status = idle_status();
    }

    pub fn close(&mut self) {
        self.stop_camera();
        self.jewelry.release();
    }

    /// Snapshots the current composite and writes it to the export directory on a
    /// background thread. `None` when there is nothing to capture yet.
    pub fn capture(&self) -> Option<CaptureJob> {
        let Some(image) = self.capture_image() else {
            log::debug!("capture requested before the first rendered frame");
            return None;
        };
        Some(CaptureJob::save(
            self.options.export_dir.clone(),
            self.asset.name.clone(),
            image,
        ))
    }

    pub fn capture_image(&self) -> Option<RgbaImage> {
        if self.state != SessionState::Active {
            return None;
        }
        let generation = self.generation.as_ref()?;
        capture::composite(generation.video.as_ref()?, generation.render.overlay(), self.mirrored)
    }

    pub fn preview_image(&self) -> Option<RgbaImage> {
        let generation = self.generation.as_ref()?;
        capture::preview(generation.video.as_ref()?, generation.render.overlay(), self.mirrored)
    }

    pub fn current_estimate(&self) -> LandmarkEstimate {
        self.generation
            .as_ref()
            .map(|g| g.detector.current_estimate())
            .unwrap_or_default()
    }

    pub fn active_camera_tracks(&self) -> usize {
        self.generation
            .as_ref()
            .map_or(0, |g| usize::from(g.camera.is_some()))
    }

    pub fn pending_render_ticks(&self) -> usize {
        self.generation
            .as_ref()
            .map_or(0, |g| g.render.pending_ticks())
    }

    pub fn detector_running(&self) -> bool {
        self.generation
            .as_ref()
            .is_some_and(|g| g.detector.is_running())
    }

    fn teardown_generation(&mut self) {
        if let Some(mut generation) = self.generation.take() {
            log::debug!("tearing down session generation {}", generation.id);
            generation.teardown();
        }
    }
}

impl<C: CameraSource, F: DetectorFactory> Drop for TryOnSession<C, F> {
    fn drop(&mut self) {
        self.close();
    }
}

fn idle_status() -> String {
    "Camera stopped".to_string()
}
