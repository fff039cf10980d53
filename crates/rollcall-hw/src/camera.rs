//! Camera session: scoped acquisition of one exclusive video stream.

use crate::frame::Frame;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera access denied: {0}")]
    Denied(String),
    #[error("no compatible camera: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera not started")]
    NotStarted,
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Facing {
    User,
    Environment,
}

/// Description of the stream held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// An acquired video device. Dropping it must release the hardware.
pub trait VideoDevice: Send {
    fn info(&self) -> StreamInfo;
    /// Dequeue a single frame, converted to grayscale.
    fn grab(&mut self) -> Result<Frame, CameraError>;
}

/// Platform access to video devices.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn acquire(&self, facing: Facing) -> Result<Box<dyn VideoDevice>, CameraError>;
}

/// Where the live stream is shown.
pub trait RenderSurface: Send + Sync {
    fn attach(&self, stream: &StreamInfo);
    fn detach(&self);
}

/// Surface that shows nothing (headless operation).
pub struct Headless;

impl RenderSurface for Headless {
    fn attach(&self, _stream: &StreamInfo) {}
    fn detach(&self) {}
}

/// Anything that can hand out one frame on demand.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn next_frame(&self) -> Result<Frame, CameraError>;
}

/// Owns the camera stream. Whoever starts it gets guaranteed release via
/// [`CameraSession::stop`] or drop.
pub struct CameraSession {
    backend: Arc<dyn VideoBackend>,
    surface: Arc<dyn RenderSurface>,
    facing: Facing,
    device: Mutex<Option<Box<dyn VideoDevice>>>,
}

impl CameraSession {
    pub fn new(backend: Arc<dyn VideoBackend>, surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            backend,
            surface,
            facing: Facing::User,
            device: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Box<dyn VideoDevice>>> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    /// Acquire the stream and attach it to the render surface.
    ///
    /// Returns the existing stream if one is already held.
    pub async fn start(&self) -> Result<StreamInfo, CameraError> {
        let running = self.slot().as_ref().map(|device| device.info());
        if let Some(info) = running {
            return Ok(info);
        }

        let device = self.backend.acquire(self.facing).await.map_err(|e| {
            tracing::warn!(error = %e, "camera start failed");
            e
        })?;
        let info = device.info();

        let mut slot = self.slot();
        if let Some(existing) = slot.as_ref() {
            // A concurrent start won; release the device we just opened.
            return Ok(existing.info());
        }
        *slot = Some(device);
        drop(slot);

        self.surface.attach(&info);
        tracing::info!(
            device = %info.device,
            width = info.width,
            height = info.height,
            format = %info.format,
            "camera started"
        );
        Ok(info)
    }

    /// Release the device and detach the surface. No-op when already stopped.
    pub fn stop(&self) {
        let released = self.slot().take();
        if let Some(device) = released {
            let info = device.info();
            drop(device);
            self.surface.detach();
            tracing::info!(device = %info.device, "camera stopped");
        }
    }
}

#[async_trait]
impl FrameSource for CameraSession {
    async fn next_frame(&self) -> Result<Frame, CameraError> {
        let mut slot = self.slot();
        let device = slot.as_mut().ok_or(CameraError::NotStarted)?;
        device.grab()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}
