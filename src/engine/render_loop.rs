use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use image::RgbaImage;

use super::{
    placement::place,
    surface::{JEWELRY_OPACITY, blend_over, pixel_box, stretch},
};
use crate::types::{JewelryCategory, LandmarkEstimate, PlacementRect};

const SCALED_CACHE_LIMIT: usize = 4;

/// Cancelable handle for one scheduled tick. Cloned into the scheduler at schedule
/// time; once cancelled, running it is a no-op.
#[derive(Clone, Debug)]
pub struct TickHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl TickHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What a tick draws from. Everything is sampled, nothing is waited on.
pub struct TickInput<'a> {
    /// Native size of the newest video frame, `None` before the first one.
    pub frame_size: Option<(u32, u32)>,
    pub category: JewelryCategory,
    pub estimate: &'a LandmarkEstimate,
    pub jewelry: Option<&'a Arc<RgbaImage>>,
}

/// Owns the overlay surface of one session generation and redraws it per tick.
pub struct RenderLoop {
    overlay: RgbaImage,
    placements: Vec<PlacementRect>,
    pending: Option<TickHandle>,
    next_id: u64,
    scaler: JewelryScaler,
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderLoop {
    pub fn new() -> Self {
        Self {
            overlay: RgbaImage::new(0, 0),
            placements: Vec::new(),
            pending: None,
            next_id: 0,
            scaler: JewelryScaler::default(),
        }
    }

    /// Schedules the next tick, replacing (and cancelling) any pending one.
    pub fn schedule(&mut self) -> TickHandle {
        self.cancel();
        self.next_id += 1;
        let handle = TickHandle {
            id: self.next_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        self.pending = Some(handle.clone());
        handle
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    pub fn pending_ticks(&self) -> usize {
        self.pending
            .iter()
            .filter(|handle| !handle.is_cancelled())
            .count()
    }

    /// Runs the tick `handle` was scheduled for and returns the next handle.
    /// A cancelled or superseded handle returns `None` and touches nothing.
    pub fn run_tick(&mut self, handle: &TickHandle, input: TickInput<'_>) -> Option<TickHandle> {
        let current = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.id == handle.id);
        if handle.is_cancelled() || !current {
            return None;
        }
        self.pending = None;

        self.draw(input);
        Some(self.schedule())
    }

    pub fn overlay(&self) -> &RgbaImage {
        &self.overlay
    }

    /// Rectangles drawn by the last tick.
    pub fn placements(&self) -> &[PlacementRect] {
        &self.placements
    }

    fn draw(&mut self, input: TickInput<'_>) {
        let Some((width, height)) = input.frame_size else {
            return;
        };
        if self.overlay.dimensions() == (width, height) {
            self.overlay.pixels_mut().for_each(|px| px.0 = [0; 4]);
        } else {
            self.overlay = RgbaImage::new(width, height);
        }
        self.placements.clear();

        let Some(jewelry) = input.jewelry else {
            return;
        };
        self.placements = place(input.category, input.estimate, width as f32, height as f32);
        for rect in &self.placements {
            let Some((x, y, w, h)) = pixel_box(rect) else {
                continue;
            };
            match self.scaler.scaled(jewelry, w, h) {
                Ok(scaled) => blend_over(&mut self.overlay, scaled, x, y, JEWELRY_OPACITY),
                Err(err) => log::warn!("failed to scale jewelry to {w}x{h}: {err:?}"),
            }
        }
    }
}

/// Keeps the last few stretched copies of the jewelry bitmap; consecutive frames
/// mostly reuse the same sizes.
#[derive(Default)]
struct JewelryScaler {
    source: Option<Arc<RgbaImage>>,
    cache: Vec<((u32, u32), RgbaImage)>,
}

impl JewelryScaler {
    fn scaled(&mut self, source: &Arc<RgbaImage>, width: u32, height: u32) -> anyhow::Result<&RgbaImage> {
        if !self
            .source
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(cached, source))
        {
            self.source = Some(source.clone());
            self.cache.clear();
        }

        let idx = match self.cache.iter().position(|(size, _)| *size == (width, height)) {
            Some(idx) => idx,
            None => {
                if self.cache.len() >= SCALED_CACHE_LIMIT {
                    self.cache.remove(0);
                }
                self.cache.push(((width, height), stretch(source, width, height)?));
                self.cache.len() - 1
            }
        };
        Ok(&self.cache[idx].1)
    }
}
