mod anchors;
mod common;
mod face;
mod hand;
mod palm;

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
};

use crossbeam_channel::{Receiver, Sender, bounded, select};

use crate::{
    error::DetectorInitError,
    model_download::{ModelKind, model_path},
    types::{Frame, JewelryCategory, LandmarkEstimate},
};

pub use face::FaceLandmarkEngine;
pub use hand::HandLandmarkEngine;

/// Which body part a session tracks. Chosen by jewelry category, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackingTarget {
    Face,
    Hand,
}

impl TrackingTarget {
    pub fn for_category(category: JewelryCategory) -> Self {
        match category {
            JewelryCategory::Earrings | JewelryCategory::Necklaces => TrackingTarget::Face,
            JewelryCategory::Rings | JewelryCategory::Bangles => TrackingTarget::Hand,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrackingTarget::Face => "face",
            TrackingTarget::Hand => "hand",
        }
    }

    pub fn not_detected(&self) -> LandmarkEstimate {
        match self {
            TrackingTarget::Face => LandmarkEstimate::face_not_detected(),
            TrackingTarget::Hand => LandmarkEstimate::hand_not_detected(),
        }
    }

    /// Model files the providers for this target need.
    pub fn required_models(&self) -> &'static [ModelKind] {
        match self {
            TrackingTarget::Face => &[ModelKind::FaceDetector],
            TrackingTarget::Hand => &[ModelKind::PalmDetector, ModelKind::HandposeEstimator],
        }
    }
}

/// One inference step: a video frame in, a landmark estimate out.
pub trait LandmarkEngine: Send + 'static {
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<LandmarkEstimate>;
}

/// Contract between the session and a landmark provider.
pub trait LandmarkSource {
    fn target(&self) -> TrackingTarget;

    /// Loads the model. Calling it again after success is a no-op; after a failure it
    /// tries again.
    fn initialize(&mut self) -> Result<(), DetectorInitError>;

    /// Starts the detection cycle on its own thread and returns immediately.
    fn start(&mut self, frames: Receiver<Frame>);

    /// Stops the detection cycle and waits for it. Safe when never started.
    fn stop(&mut self);

    /// Last published estimate; may lag the video by a few frames.
    fn current_estimate(&self) -> LandmarkEstimate;

    fn is_running(&self) -> bool;
}

/// Builds the landmark source a session needs for its category.
pub trait DetectorFactory {
    fn create(&self, target: TrackingTarget) -> Box<dyn LandmarkSource>;
}

/// Single-value mailbox between the detector thread and the render tick. Writers
/// overwrite, readers copy the latest value; nothing ever waits for a new value.
#[derive(Clone, Debug, Default)]
pub struct EstimateSlot {
    inner: Arc<Mutex<LandmarkEstimate>>,
}

impl EstimateSlot {
    pub fn new(initial: LandmarkEstimate) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn publish(&self, estimate: LandmarkEstimate) {
        let mut slot = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = estimate;
    }

    pub fn latest(&self) -> LandmarkEstimate {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

type EngineLoader = Box<dyn FnMut() -> Result<Box<dyn LandmarkEngine>, DetectorInitError> + Send>;

struct Worker {
    // Dropping the sender wakes the worker's select and ends the loop.
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<Box<dyn LandmarkEngine>>,
}

/// Runs a [`LandmarkEngine`] on a worker thread and exposes it as a [`LandmarkSource`].
pub struct DetectorAdapter {
    target: TrackingTarget,
    loader: EngineLoader,
    engine: Option<Box<dyn LandmarkEngine>>,
    slot: EstimateSlot,
    worker: Option<Worker>,
}

impl DetectorAdapter {
    pub fn new<L>(target: TrackingTarget, loader: L) -> Self
    where
        L: FnMut() -> Result<Box<dyn LandmarkEngine>, DetectorInitError> + Send + 'static,
    {
        Self {
            target,
            loader: Box::new(loader),
            engine: None,
            slot: EstimateSlot::new(target.not_detected()),
            worker: None,
        }
    }
}

impl LandmarkSource for DetectorAdapter {
    fn target(&self) -> TrackingTarget {
        self.target
    }

    fn initialize(&mut self) -> Result<(), DetectorInitError> {
        if self.engine.is_some() || self.worker.is_some() {
            return Ok(());
        }

        let engine = (self.loader)()?;
        log::info!("{} landmark model ready", self.target.label());
        self.engine = Some(engine);
        Ok(())
    }

    fn start(&mut self, frames: Receiver<Frame>) {
        if self.worker.is_some() {
            return;
        }
        let Some(engine) = self.engine.take() else {
            log::warn!(
                "{} landmark model not loaded; detection stays off",
                self.target.label()
            );
            return;
        };

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let slot = self.slot.clone();
        let target = self.target;
        let handle = thread::spawn(move || run_worker_loop(engine, target, frames, stop_rx, slot));

        log::debug!("{} landmark worker started", self.target.label());
        self.worker = Some(Worker { stop_tx, handle });
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        drop(worker.stop_tx);
        match worker.handle.join() {
            Ok(engine) => self.engine = Some(engine),
            Err(_) => log::error!("{} landmark worker panicked", self.target.label()),
        }
        // Positions from a stopped cycle must not leak into the next one.
        self.slot.publish(self.target.not_detected());
        log::debug!("{} landmark worker stopped", self.target.label());
    }

    fn current_estimate(&self) -> LandmarkEstimate {
        self.slot.latest()
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for DetectorAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker_loop(
    mut engine: Box<dyn LandmarkEngine>,
    target: TrackingTarget,
    frames: Receiver<Frame>,
    stop_rx: Receiver<()>,
    slot: EstimateSlot,
) -> Box<dyn LandmarkEngine> {
    loop {
        let frame = select! {
            recv(stop_rx) -> _ => break,
            recv(frames) -> msg => match msg {
                Ok(frame) => latest_frame(frame, &frames),
                Err(_) => break,
            },
        };

        match engine.estimate(&frame) {
            Ok(estimate) => slot.publish(estimate),
            Err(err) => {
                log::warn!("{} landmark inference failed: {err:?}", target.label());
                // A failed frame says nothing about where the body part is now.
                slot.publish(target.not_detected());
            }
        }
    }
    engine
}

fn latest_frame(mut frame: Frame, frames: &Receiver<Frame>) -> Frame {
    while let Ok(newer) = frames.try_recv() {
        frame = newer;
    }
    frame
}

/// Production factory: ONNX models from `model_dir`.
#[derive(Clone, Debug)]
pub struct OrtDetectorFactory {
    model_dir: PathBuf,
}

impl OrtDetectorFactory {
    pub fn new(model_dir: PathBuf) -> Self {
        Self { model_dir }
    }

    fn model(&self, kind: ModelKind) -> Result<PathBuf, DetectorInitError> {
        let path = model_path(&self.model_dir, kind);
        if path.exists() {
            Ok(path)
        } else {
            Err(DetectorInitError::ModelMissing(path))
        }
    }
}

impl DetectorFactory for OrtDetectorFactory {
    fn create(&self, target: TrackingTarget) -> Box<dyn LandmarkSource> {
        let factory = self.clone();
        let adapter = match target {
            TrackingTarget::Face => DetectorAdapter::new(target, move || {
                let detector = factory.model(ModelKind::FaceDetector)?;
                let engine = FaceLandmarkEngine::load(&detector)?;
                Ok(Box::new(engine) as Box<dyn LandmarkEngine>)
            }),
            TrackingTarget::Hand => DetectorAdapter::new(target, move || {
                let palm = factory.model(ModelKind::PalmDetector)?;
                let handpose = factory.model(ModelKind::HandposeEstimator)?;
                let engine = HandLandmarkEngine::load(&palm, &handpose)?;
                Ok(Box::new(engine) as Box<dyn LandmarkEngine>)
            }),
        };
        Box::new(adapter)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::types::{HandEstimate, Point};

    struct CountingEngine {
        calls: Arc<Mutex<Vec<u32>>>,
    }

    impl LandmarkEngine for CountingEngine {
        fn estimate(&mut self, frame: &Frame) -> anyhow::Result<LandmarkEstimate> {
            self.calls.lock().unwrap().push(frame.width);
            Ok(LandmarkEstimate::Hand(HandEstimate {
                detected: true,
                wrist: Some(Point::new(frame.width as f32, 1.0)),
                hand_width: Some(10.0),
                ..Default::default()
            }))
        }
    }

    /// Detects once, then every later inference fails.
    struct FailingAfterFirst {
        served: bool,
    }

    impl LandmarkEngine for FailingAfterFirst {
        fn estimate(&mut self, frame: &Frame) -> anyhow::Result<LandmarkEstimate> {
            if self.served {
                anyhow::bail!("inference backend error");
            }
            self.served = true;
            Ok(LandmarkEstimate::Hand(HandEstimate {
                detected: true,
                ring_finger_base: Some(Point::new(frame.width as f32, 1.0)),
                hand_width: Some(10.0),
                ..Default::default()
            }))
        }
    }

    fn frame(width: u32) -> Frame {
        Frame::new(vec![0; (width * 2 * 4) as usize], width, 2)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn categories_map_to_exactly_one_target() {
        assert_eq!(TrackingTarget::for_category(JewelryCategory::Earrings), TrackingTarget::Face);
        assert_eq!(TrackingTarget::for_category(JewelryCategory::Necklaces), TrackingTarget::Face);
        assert_eq!(TrackingTarget::for_category(JewelryCategory::Rings), TrackingTarget::Hand);
        assert_eq!(TrackingTarget::for_category(JewelryCategory::Bangles), TrackingTarget::Hand);
    }

    #[test]
    fn slot_keeps_only_the_latest_value() {
        let slot = EstimateSlot::new(LandmarkEstimate::Absent);
        slot.publish(LandmarkEstimate::hand_not_detected());
        slot.publish(LandmarkEstimate::face_not_detected());
        assert_eq!(slot.latest(), LandmarkEstimate::face_not_detected());
        assert_eq!(slot.latest(), LandmarkEstimate::face_not_detected());
    }

    #[test]
    fn adapter_publishes_and_stops() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine_calls = calls.clone();
        let mut adapter = DetectorAdapter::new(TrackingTarget::Hand, move || {
            Ok(Box::new(CountingEngine {
                calls: engine_calls.clone(),
            }) as Box<dyn LandmarkEngine>)
        });

        adapter.initialize().unwrap();
        adapter.initialize().unwrap();
        let (tx, rx) = bounded(1);
        adapter.start(rx);
        assert!(adapter.is_running());

        tx.send(frame(7)).unwrap();
        assert!(wait_until(|| adapter.current_estimate().detected()));

        adapter.stop();
        assert!(!adapter.is_running());
        assert!(!adapter.current_estimate().detected());
        // The camera side may keep sending; nobody is listening and nothing panics.
        let _ = tx.try_send(frame(9));
        adapter.stop();
        assert_eq!(calls.lock().unwrap().as_slice(), &[7]);
    }

    #[test]
    fn inference_failure_clears_a_previous_detection() {
        let mut adapter = DetectorAdapter::new(TrackingTarget::Hand, || {
            Ok(Box::new(FailingAfterFirst { served: false }) as Box<dyn LandmarkEngine>)
        });
        adapter.initialize().unwrap();
        let (tx, rx) = bounded(1);
        adapter.start(rx);

        tx.send(frame(5)).unwrap();
        assert!(wait_until(|| adapter.current_estimate().detected()));

        tx.send(frame(6)).unwrap();
        assert!(wait_until(|| !adapter.current_estimate().detected()));
        assert_eq!(adapter.current_estimate(), LandmarkEstimate::hand_not_detected());
        assert!(adapter.is_running());
        adapter.stop();
    }

    #[test]
    fn failed_initialization_leaves_detection_off() {
        let mut attempts = 0;
        let mut adapter = DetectorAdapter::new(TrackingTarget::Face, move || {
            attempts += 1;
            Err(DetectorInitError::ModelMissing(PathBuf::from(format!("missing-{attempts}"))))
        });

        assert!(adapter.initialize().is_err());
        assert!(adapter.initialize().is_err());
        let (_tx, rx) = bounded(1);
        adapter.start(rx);
        assert!(!adapter.is_running());
        assert_eq!(adapter.current_estimate(), LandmarkEstimate::face_not_detected());
        adapter.stop();
    }

    #[test]
    fn worker_skips_to_newest_queued_frame() {
        let (tx, rx) = bounded(4);
        tx.send(frame(1)).unwrap();
        tx.send(frame(2)).unwrap();
        tx.send(frame(3)).unwrap();
        let first = rx.recv().unwrap();
        assert_eq!(latest_frame(first, &rx).width, 3);
    }

    #[test]
    fn missing_model_files_fail_initialization() {
        let dir = std::env::temp_dir().join("jewelry-tryon-no-models");
        let factory = OrtDetectorFactory::new(dir);
        for target in [TrackingTarget::Face, TrackingTarget::Hand] {
            let mut source = factory.create(target);
            assert_eq!(source.target(), target);
            assert!(matches!(
                source.initialize(),
                Err(DetectorInitError::ModelMissing(_))
            ));
        }
    }
}
