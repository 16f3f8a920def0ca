//! Recording system module
//!
//! This module implements the timed recording that runs on an active
//! capture session:
//! - RecorderState and the fixed RecordingWindow
//! - EncoderFactory / MediaEncoder for the platform encoder
//! - the recording task that collects chunks until the window closes

pub mod encoder;
pub mod ffmpeg;
pub mod session;
pub mod state;

pub use encoder::{EncoderFactory, MediaEncoder, VideoFormat};
pub use session::{RecordingHandle, RecordingTicket};
pub use state::{RecorderState, RecordingError, RecordingWindow, StopReason};
