use std::{
    fs,
    path::{Path, PathBuf},
    thread,
};

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use image::{ExtendedColorType, ImageEncoder, RgbaImage, codecs::png::PngEncoder, imageops};

use super::surface::blend_over;
use crate::{error::ExportError, types::Frame};

/// Still image for export: the video (flipped when mirrored) with the overlay drawn
/// on top unflipped. The overlay is already laid out for the presented video, so it
/// must not be mirrored a second time.
///
/// `None` while there is nothing consistent to capture.
pub fn composite(frame: &Frame, overlay: &RgbaImage, mirrored: bool) -> Option<RgbaImage> {
    if frame.is_empty() || overlay.dimensions() != (frame.width, frame.height) {
        return None;
    }
    let mut output = frame.to_image()?;
    if mirrored {
        imageops::flip_horizontal_in_place(&mut output);
    }
    blend_over(&mut output, overlay, 0, 0, 1.0);
    Some(output)
}

/// On-screen presentation: video and overlay share native coordinates and the
/// whole picture is flipped when mirrored. Before the overlay is sized only the
/// video shows.
pub fn preview(frame: &Frame, overlay: &RgbaImage, mirrored: bool) -> Option<RgbaImage> {
    if frame.is_empty() {
        return None;
    }
    let mut output = frame.to_image()?;
    if overlay.dimensions() == output.dimensions() {
        blend_over(&mut output, overlay, 0, 0, 1.0);
    }
    if mirrored {
        imageops::flip_horizontal_in_place(&mut output);
    }
    Some(output)
}

/// `tryon-<name>.png` with whitespace runs turned into single dashes. Path
/// separators are replaced as well so the file always lands in the export directory.
pub fn export_file_name(product_name: &str) -> String {
    let slug = product_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .replace(['/', '\\'], "_");
    format!("tryon-{slug}.png")
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(bytes)
}

pub fn save_capture(
    export_dir: &Path,
    product_name: &str,
    image: &RgbaImage,
) -> Result<PathBuf, ExportError> {
    let bytes = encode_png(image)?;
    fs::create_dir_all(export_dir).map_err(|source| ExportError::Io {
        path: export_dir.to_path_buf(),
        source,
    })?;
    let path = export_dir.join(export_file_name(product_name));
    fs::write(&path, bytes).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;
    log::info!("saved try-on capture to {}", path.display());
    Ok(path)
}

/// A capture being encoded and written off the render thread.
pub struct CaptureJob {
    rx: Receiver<Result<PathBuf, ExportError>>,
}

impl CaptureJob {
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<PathBuf, ExportError> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let _ = tx.send(work());
        });
        Self { rx }
    }

    /// Writes `image` to `export_dir` in the background.
    pub fn save(export_dir: PathBuf, product_name: String, image: RgbaImage) -> Self {
        Self::spawn(move || save_capture(&export_dir, &product_name, &image))
    }

    /// The outcome once the write has finished. Never blocks.
    pub fn poll(&self) -> Option<Result<PathBuf, ExportError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(writer_exited())),
        }
    }

    /// Blocks until the write has finished.
    pub fn wait(self) -> Result<PathBuf, ExportError> {
        self.rx.recv().unwrap_or_else(|_| Err(writer_exited()))
    }
}

fn writer_exited() -> ExportError {
    ExportError::Io {
        path: PathBuf::new(),
        source: std::io::Error::other("capture writer exited without a result"),
    }
}
