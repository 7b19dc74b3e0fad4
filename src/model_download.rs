use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

/// ONNX models the landmark providers load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelKind {
    PalmDetector,
    HandposeEstimator,
    FaceDetector,
}

impl ModelKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm_detection_mediapipe_2023feb.onnx",
            ModelKind::HandposeEstimator => "handpose_estimation_mediapipe_2023feb.onnx",
            ModelKind::FaceDetector => "face_detection_yunet_2023mar.onnx",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => {
                "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/palm_detection_mediapipe_2023feb.onnx"
            }
            ModelKind::HandposeEstimator => {
                "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx"
            }
            ModelKind::FaceDetector => {
                "https://github.com/opencv/opencv_zoo/raw/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx"
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::PalmDetector => "palm detector",
            ModelKind::HandposeEstimator => "handpose estimator",
            ModelKind::FaceDetector => "face detector",
        }
    }
}

pub fn model_path(model_dir: &Path, kind: ModelKind) -> PathBuf {
    model_dir.join(kind.file_name())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

/// Makes sure every model in `kinds` exists under `model_dir`, downloading the
/// missing ones in order.
pub fn ensure_models_ready<F>(
    model_dir: &Path,
    kinds: &[ModelKind],
    mut on_event: F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    for &kind in kinds {
        ensure_model_ready(kind, &model_path(model_dir, kind), &mut on_event)?;
    }
    Ok(())
}

pub fn ensure_model_ready<F>(model: ModelKind, path: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent { model });
        on_event(ModelDownloadEvent::Finished { model });
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(model, model.url(), path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", model.label()));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
    .with_context(|| format!("failed to download {} model to {}", model.label(), path.display()))
}

fn download_to_path<F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let mut response = Client::new()
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total = response.content_length();
    on_event(ModelDownloadEvent::Started { model, total });

    let tmp_path = dest.with_extension("download");
    let file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    let mut sink = ProgressWriter {
        inner: BufWriter::new(file),
        model,
        written: 0,
        total,
        on_event: &mut *on_event,
    };
    io::copy(&mut response, &mut sink).context("failed while streaming model to disk")?;
    let file = sink
        .inner
        .into_inner()
        .map_err(|err| err.into_error())
        .context("failed to flush downloaded model")?;
    file.sync_all()
        .context("failed to sync downloaded model to disk")?;
    drop(file);

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

/// Reports every chunk written as a `Progress` event.
struct ProgressWriter<'a, W, F> {
    inner: W,
    model: ModelKind,
    written: u64,
    total: Option<u64>,
    on_event: &'a mut F,
}

impl<W: Write, F: FnMut(ModelDownloadEvent)> Write for ProgressWriter<'_, W, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        (self.on_event)(ModelDownloadEvent::Progress {
            model: self.model,
            downloaded: self.written,
            total: self.total,
        });
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn create_progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
