//! rollcall-hw — Camera session management and V4L2 capture.
//!
//! The session owns the only handle to the video device and guarantees it is
//! released on stop or drop.

pub mod camera;
pub mod frame;
pub mod v4l_backend;

pub use camera::{
    CameraError, CameraSession, Facing, FrameSource, Headless, RenderSurface, StreamInfo,
    VideoBackend, VideoDevice,
};
pub use frame::Frame;
pub use v4l_backend::V4lBackend;
