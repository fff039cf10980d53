//! V4L2 video backend via the `v4l` crate.

use crate::camera::{CameraError, Facing, StreamInfo, VideoBackend, VideoDevice};
use crate::frame::{self, Frame};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUEST_WIDTH: u32 = 640;
const REQUEST_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else {
            None
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Yuyv => "YUYV",
            Self::Grey => "GREY",
            Self::Y16 => "Y16",
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Backend bound to one configured device node (e.g. "/dev/video0").
pub struct V4lBackend {
    device_path: String,
}

impl V4lBackend {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                        bus: caps.bus.clone(),
                    })
            })
            .collect()
    }
}

/// Map an open/query error to the session taxonomy.
fn classify_open_error(device_path: &str, e: &io::Error) -> CameraError {
    let text = e.to_string();
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::Denied(format!("{device_path}: {text}")),
        _ if text.contains("busy") || text.contains("EBUSY") => {
            CameraError::Unavailable(format!("{device_path}: device busy"))
        }
        _ => CameraError::Unavailable(format!("{device_path}: {text}")),
    }
}

#[async_trait]
impl VideoBackend for V4lBackend {
    async fn acquire(&self, facing: Facing) -> Result<Box<dyn VideoDevice>, CameraError> {
        // V4L2 has no facing metadata; the configured node is assumed user-facing.
        tracing::debug!(device = %self.device_path, ?facing, "acquiring V4L2 device");
        let path = self.device_path.as_str();

        if !Path::new(path).exists() {
            return Err(CameraError::Unavailable(format!("{path}: no such device")));
        }

        let device = Device::with_path(path).map_err(|e| classify_open_error(path, &e))?;
        let caps = device
            .query_caps()
            .map_err(|e| classify_open_error(path, &e))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::Unavailable(format!(
                "{path}: not a video capture device"
            )));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::Unavailable(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUEST_WIDTH;
        fmt.height = REQUEST_HEIGHT;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::Unavailable(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::Unavailable(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = pixel_format.name(),
            "opened V4L2 camera"
        );

        Ok(Box::new(V4lDevice {
            device,
            path: path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        }))
    }
}

/// An open V4L2 device. The file descriptor closes on drop.
pub struct V4lDevice {
    device: Device,
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lDevice {
    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width as usize) * (self.height as usize);
        let converted = match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

impl VideoDevice for V4lDevice {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            device: self.path.clone(),
            width: self.width,
            height: self.height,
            format: self.pixel_format.name().to_string(),
        }
    }

    fn grab(&mut self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let gray = self.to_grayscale(buf)?;

        Frame::new(gray, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}
