//! Error types and handling
//!
//! Each module has its own error enum; `AppError` gathers them for callers
//! that drive the whole pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acquisition::FileError;
use crate::api::ApiError;
use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::recorder::state::RecordingError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Capture(e) => match e {
                CaptureError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
                CaptureError::SurfaceUnavailable => "SURFACE_UNAVAILABLE",
                CaptureError::Busy => "BUSY",
                CaptureError::Cancelled => "CANCELLED",
            },
            AppError::Recording(e) => match e {
                RecordingError::NotReady => "NOT_READY",
                RecordingError::AlreadyRecording => "BUSY",
                RecordingError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
                RecordingError::Discarded => "RECORDING_DISCARDED",
                RecordingError::Encoder(_) | RecordingError::Io(_) => "RECORDING_FAILED",
            },
            AppError::File(e) => match e {
                FileError::InvalidType { .. } | FileError::Empty => "INVALID_TYPE",
                FileError::TooLarge { .. } => "TOO_LARGE",
                FileError::Io(_) => "IO_ERROR",
            },
            AppError::Api(e) => match e {
                ApiError::Network(_) => "NETWORK_FAILURE",
                ApiError::Rejected { .. } | ApiError::Decode(_) => "REMOTE_REJECTION",
            },
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the user can retry without changing anything
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::Recording(RecordingError::UnsupportedFormat(_)) | AppError::Config(_)
        )
    }
}

/// Error response for frontends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
