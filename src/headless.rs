use std::time::Duration;

use anyhow::{Result, bail};
use crossbeam_channel::tick;

use crate::{
    config::TryOnArgs,
    engine::TryOnSession,
    model_download::ensure_models_ready,
    pipeline::{OrtDetectorFactory, TrackingTarget, default_camera},
};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Opens a session without a window, renders `headless_frames` ticks and writes one
/// capture to the export directory.
pub fn run(args: &TryOnArgs) -> Result<()> {
    let target = TrackingTarget::for_category(args.category);
    if let Err(err) = ensure_models_ready(&args.model_dir, target.required_models(), |_| {}) {
        log::error!("model download failed, continuing with fallback placement: {err:#}");
    }

    let mut session = TryOnSession::new(
        args.asset(),
        default_camera(args.camera),
        OrtDetectorFactory::new(args.model_dir.clone()),
        args.session_options(),
    );
    session.open();
    if let Some(err) = session.error() {
        bail!("{}", err.user_message());
    }
    log::info!(
        "headless try-on of {} with {} camera track(s), {} tracking {}",
        session.asset().name,
        session.active_camera_tracks(),
        session.tracking_target().label(),
        if session.fallback_mode() { "unavailable" } else { "enabled" }
    );

    let ticker = tick(FRAME_INTERVAL);
    for frame in 0..args.headless_frames {
        ticker.recv()?;
        if !session.tick() {
            log::warn!("session stopped rendering after {frame} ticks");
            break;
        }
        log::debug!(
            "tick {frame}: {} (detected {}, pending ticks {})",
            session.status_text(),
            session.current_estimate().detected(),
            session.pending_render_ticks()
        );
    }

    match session.capture() {
        Some(job) => println!("{}", job.wait()?.display()),
        None => log::warn!("no camera frame arrived, nothing captured"),
    }
    log::info!("{}", session.status_text());
    session.close();
    Ok(())
}
