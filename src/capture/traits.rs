//! Capture trait definitions
//!
//! Platform-agnostic seams for the camera hardware and the surface that
//! renders its preview. The controller only ever talks to these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

use super::controller::CaptureError;

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Supported resolutions
    pub supported_resolutions: Vec<Resolution>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Which way the requested camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front-facing, pointed at the person enrolling
    User,
    /// Rear-facing
    Environment,
}

impl Default for FacingMode {
    fn default() -> Self {
        Self::User
    }
}

/// What the controller asks the hardware for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    /// Preferred (not mandatory) frame size
    pub ideal: Resolution,

    /// Camera direction
    pub facing: FacingMode,

    /// Device index for backends that enumerate by index
    pub device_index: u32,

    /// Preferred frame rate
    pub frame_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal: Resolution { width: 640, height: 480 },
            facing: FacingMode::User,
            device_index: 0,
            frame_rate: 30,
        }
    }
}

/// Raw pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv422,
    Nv12,
    Rgb24,
    Mjpeg,
}

impl PixelFormat {
    /// FFmpeg `-pixel_format` name for this layout
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Yuyv422 => "yuyv422",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Mjpeg => "mjpeg",
        }
    }
}

/// A single frame delivered by a live stream
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: bytes::Bytes,
    /// Time since the stream opened
    pub timestamp: Duration,
}

/// Receiver half of a stream's frame feed
pub type FrameReceiver = broadcast::Receiver<VideoFrame>;

/// An open hardware stream.
///
/// Dropping a stream without calling [`MediaStream::stop_all_tracks`] is a
/// bug; the controller always stops tracks explicitly.
pub trait MediaStream: Send + Sync {
    /// Identifier used when attaching to a surface
    fn id(&self) -> &str;

    /// Negotiated frame size
    fn resolution(&self) -> Resolution;

    /// Negotiated frame rate
    fn frame_rate(&self) -> u32;

    /// Pixel layout of delivered frames
    fn pixel_format(&self) -> PixelFormat;

    /// Subscribe to frames produced from now on
    fn frames(&self) -> FrameReceiver;

    /// Number of tracks still delivering data
    fn live_tracks(&self) -> usize;

    /// Stop every track. Must be idempotent.
    fn stop_all_tracks(&self);
}

/// Camera hardware access
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Enumerate attached cameras
    fn list_cameras(&self) -> Vec<CameraInfo>;

    /// Acquire the camera. Suspends until the device (and any permission
    /// prompt) answers.
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>, CaptureError>;
}

/// Where the live preview is rendered
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Resolves once the surface can accept a stream
    async fn ready(&self);

    /// Attach a stream for preview. Fails with `SurfaceUnavailable` when the
    /// surface is not ready yet.
    fn attach(&self, stream_id: &str) -> Result<(), CaptureError>;

    /// Detach whatever is attached. Must be idempotent.
    fn detach(&self);

    /// Currently attached stream, if any
    fn attached(&self) -> Option<String>;
}
