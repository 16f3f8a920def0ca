//! Video encoder abstraction
//!
//! The recorder asks an [`EncoderFactory`] which container/codec strings it
//! supports, picks the first one from the preference list, and then pulls
//! encoded chunks from a [`MediaEncoder`] once per timeslice.

use async_trait::async_trait;

use super::state::{RecordingError, RecordingResult};
use crate::capture::traits::MediaStream;

/// High quality first choice
pub const PREFERRED_FORMAT: &str = "video/webm;codecs=vp9";

/// Baseline fallback
pub const BASELINE_FORMAT: &str = "video/webm";

/// A negotiated output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    /// Full format string, including codec parameters
    pub format: String,
}

impl VideoFormat {
    pub fn new(format: impl Into<String>) -> Self {
        Self { format: format.into() }
    }

    /// Container mime type without codec parameters
    pub fn mime_type(&self) -> &str {
        self.format
            .split(';')
            .next()
            .map(str::trim)
            .unwrap_or(&self.format)
    }

    /// Requested codec, if the format string names one
    pub fn codec(&self) -> Option<&str> {
        self.format
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("codecs="))
            .map(|codecs| codecs.trim_matches('"').split(',').next().unwrap_or("").trim())
            .find(|codec| !codec.is_empty())
    }
}

/// A running encoder attached to a live stream
#[async_trait]
pub trait MediaEncoder: Send {
    /// Encoded data produced since the previous call
    async fn request_data(&mut self) -> RecordingResult<Option<bytes::Bytes>>;

    /// Flush and stop. Returns whatever was still buffered. Safe to call
    /// more than once; later calls return an empty buffer.
    async fn finish(&mut self) -> RecordingResult<bytes::Bytes>;
}

/// Platform video-encoding capability
pub trait EncoderFactory: Send + Sync {
    /// Whether this platform can produce the given format
    fn is_supported(&self, format: &str) -> bool;

    /// Start encoding the given stream
    fn create(
        &self,
        stream: &dyn MediaStream,
        format: &VideoFormat,
    ) -> RecordingResult<Box<dyn MediaEncoder>>;
}

/// Pick the first supported format from `preferences`
pub fn select_format(
    factory: &dyn EncoderFactory,
    preferences: &[String],
) -> RecordingResult<VideoFormat> {
    preferences
        .iter()
        .find(|format| factory.is_supported(format))
        .map(|format| VideoFormat::new(format.clone()))
        .ok_or_else(|| RecordingError::UnsupportedFormat(preferences.join(", ")))
}

/// Default preference list
pub fn default_formats() -> Vec<String> {
    vec![PREFERRED_FORMAT.to_string(), BASELINE_FORMAT.to_string()]
}
