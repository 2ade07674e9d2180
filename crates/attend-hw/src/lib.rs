//! attend-hw — Webcam access for attendance face checks.
//!
//! V4L2 capture with conversion of every supported pixel format to the
//! grayscale frames the face engine consumes.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::Frame;
