use std::{sync::Arc, thread, time::Duration};

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use image::RgbaImage;
use reqwest::blocking::Client;

use crate::error::AssetError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Fetches (http/https) or reads (anything else, as a path) and decodes to RGBA.
pub fn load_jewelry(source: &str) -> Result<RgbaImage, AssetError> {
    let bytes = if source.starts_with("http://") || source.starts_with("https://") {
        fetch(source)?
    } else {
        std::fs::read(source).map_err(|err| AssetError::Fetch {
            url: source.to_string(),
            reason: err.to_string(),
        })?
    };
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

fn fetch(url: &str) -> Result<Vec<u8>, AssetError> {
    let fail = |reason: String| AssetError::Fetch {
        url: url.to_string(),
        reason,
    };
    let client = Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|err| fail(err.to_string()))?;
    let response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|err| fail(err.to_string()))?;
    let bytes = response.bytes().map_err(|err| fail(err.to_string()))?;
    Ok(bytes.to_vec())
}

enum BitmapState {
    Empty,
    Loading(Receiver<Result<RgbaImage, AssetError>>),
    Ready(Arc<RgbaImage>),
    Failed,
}

/// The jewelry image of a session, decoded off the UI thread and polled per tick.
pub struct JewelryBitmap {
    state: BitmapState,
}

impl Default for JewelryBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl JewelryBitmap {
    pub fn new() -> Self {
        Self {
            state: BitmapState::Empty,
        }
    }

    /// Starts loading `source` unless a load is already running or finished.
    pub fn ensure_loading(&mut self, source: &str) {
        if !matches!(self.state, BitmapState::Empty) {
            return;
        }
        let (tx, rx) = bounded(1);
        let source = source.to_string();
        thread::spawn(move || {
            let result = load_jewelry(&source);
            let _ = tx.send(result);
        });
        self.state = BitmapState::Loading(rx);
    }

    /// Returns the bitmap once it has finished loading. Never blocks.
    pub fn poll(&mut self) -> Option<&Arc<RgbaImage>> {
        if let BitmapState::Loading(rx) = &self.state {
            self.state = match rx.try_recv() {
                Ok(Ok(image)) => {
                    log::info!("jewelry image ready ({}x{})", image.width(), image.height());
                    BitmapState::Ready(Arc::new(image))
                }
                Ok(Err(err)) => {
                    log::warn!("jewelry image unavailable, overlay stays empty: {err}");
                    BitmapState::Failed
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("jewelry loader exited without a result");
                    BitmapState::Failed
                }
            };
        }
        match &self.state {
            BitmapState::Ready(image) => Some(image),
            _ => None,
        }
    }

    /// Nothing loaded and no load running.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, BitmapState::Empty)
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.state, BitmapState::Failed)
    }

    pub fn release(&mut self) {
        self.state = BitmapState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use image::Rgba;

    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("jewelry-tryon-{}-{name}", std::process::id()))
    }

    fn wait_for(bitmap: &mut JewelryBitmap) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while bitmap.poll().is_none() && !bitmap.has_failed() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn loads_a_local_png() {
        let path = temp_file("ring.png");
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 128]))
            .save(&path)
            .unwrap();

        let image = load_jewelry(path.to_str().unwrap()).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3, 128]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let path = temp_file("garbage.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            load_jewelry(path.to_str().unwrap()),
            Err(AssetError::Decode(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn background_load_is_polled_then_released() {
        let path = temp_file("bangle.png");
        RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();

        let mut bitmap = JewelryBitmap::new();
        bitmap.ensure_loading(path.to_str().unwrap());
        wait_for(&mut bitmap);
        assert!(bitmap.poll().is_some());

        bitmap.release();
        assert!(bitmap.is_idle());
        assert!(bitmap.poll().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_fails_without_panicking() {
        let mut bitmap = JewelryBitmap::new();
        bitmap.ensure_loading("/definitely/not/here.png");
        wait_for(&mut bitmap);
        assert!(bitmap.has_failed());
        assert!(bitmap.poll().is_none());
    }
}
