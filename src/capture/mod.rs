//! Camera capture
//!
//! This module owns the camera: the platform seams, the preview surface and
//! the controller that guarantees a single open stream.

pub mod controller;
pub mod surface;
pub mod traits;

#[cfg(feature = "native-camera")]
pub mod native;

pub use controller::{
    CaptureController, CaptureError, CaptureEvent, CaptureSessionInfo, CaptureSettings,
    CaptureStatus,
};
pub use surface::ReadinessSurface;
pub use traits::{
    CameraBackend, CameraInfo, CaptureConstraints, FacingMode, MediaStream, RenderSurface,
    Resolution, VideoFrame,
};
