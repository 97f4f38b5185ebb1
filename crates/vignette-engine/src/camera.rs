use std::path::{Path, PathBuf};

use tracing::debug;
use vignette_contracts::images::{mime_for_extension, ImageRef};

use crate::error::{PortraitError, PortraitResult};

pub trait CameraDevice: Send {
    fn open(&mut self) -> PortraitResult<Box<dyn CameraStream>>;
}

/// An acquired capture stream. `stop` releases the underlying device.
pub trait CameraStream: Send {
    fn capture_still(&mut self) -> PortraitResult<ImageRef>;
    fn stop(&mut self);
}

/// Owns an open stream and releases it exactly once, on `release` or drop.
pub struct CameraGuard {
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraGuard {
    pub fn acquire(device: &mut dyn CameraDevice) -> PortraitResult<Self> {
        let stream = device.open()?;
        debug!("camera acquired");
        Ok(Self {
            stream: Some(stream),
        })
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn capture_still(&mut self) -> PortraitResult<ImageRef> {
        match self.stream.as_mut() {
            Some(stream) => stream.capture_still(),
            None => Err(PortraitError::camera("camera is not open")),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("camera released");
        }
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Camera backed by an image file on disk; every capture re-reads it.
pub struct StillFileCamera {
    path: PathBuf,
}

impl StillFileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CameraDevice for StillFileCamera {
    fn open(&mut self) -> PortraitResult<Box<dyn CameraStream>> {
        if !self.path.is_file() {
            return Err(PortraitError::camera(format!(
                "no still image at {}",
                self.path.display()
            )));
        }
        Ok(Box::new(StillFileStream {
            path: self.path.clone(),
        }))
    }
}

struct StillFileStream {
    path: PathBuf,
}

impl CameraStream for StillFileStream {
    fn capture_still(&mut self) -> PortraitResult<ImageRef> {
        let bytes = std::fs::read(&self.path)
            .map_err(|err| PortraitError::camera(format!("{}: {err}", self.path.display())))?;
        if bytes.is_empty() {
            return Err(PortraitError::camera(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        let ext = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Ok(ImageRef::new(mime_for_extension(ext), bytes))
    }

    fn stop(&mut self) {}
}
