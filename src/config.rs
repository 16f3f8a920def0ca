//! Pipeline configuration
//!
//! Every field has a default, so an empty TOML file (or none at all) gives
//! the stock 640x480 / 5 s / 10 MiB pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::capture::traits::{CaptureConstraints, FacingMode, Resolution};
use crate::capture::CaptureSettings;
use crate::recorder::encoder;
use crate::recorder::state::{RecordingWindow, DEFAULT_RECORDING_DURATION_MS, DEFAULT_TIMESLICE_MS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub camera: CameraConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub submission: SubmissionConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub facing: FacingMode,
    pub device_index: u32,
    pub frame_rate: u32,
    /// Wait for the preview surface before the single attach retry
    pub surface_ready_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: FacingMode::User,
            device_index: 0,
            frame_rate: 30,
            surface_ready_timeout_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Length of a camera recording
    pub duration_ms: u64,
    /// Data request / progress sampling interval
    pub timeslice_ms: u64,
    /// Encoder formats, best first
    pub preferred_formats: Vec<String>,
    /// Logical filename of recorded artifacts
    pub filename: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_RECORDING_DURATION_MS,
            timeslice_ms: DEFAULT_TIMESLICE_MS,
            preferred_formats: encoder::default_formats(),
            filename: crate::capture::controller::DEFAULT_RECORDING_FILENAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: crate::acquisition::DEFAULT_MAX_FILE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Simulated progress tick
    pub progress_tick_ms: u64,
    /// Percent added per simulated tick
    pub progress_step: u8,
    /// Highest progress shown before the response arrives
    pub progress_cap: u8,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: 200,
            progress_step: 10,
            progress_cap: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 60,
            page_size: 100,
        }
    }
}

impl PipelineConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Camera size must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }

        if self.recording.duration_ms == 0 || self.recording.timeslice_ms == 0 {
            return Err(ConfigError::Invalid(
                "Recording duration and timeslice must be non-zero".to_string(),
            ));
        }
        if self.recording.timeslice_ms > self.recording.duration_ms {
            return Err(ConfigError::Invalid(format!(
                "Timeslice {}ms exceeds recording duration {}ms",
                self.recording.timeslice_ms, self.recording.duration_ms
            )));
        }
        if self.recording.preferred_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one preferred recording format is required".to_string(),
            ));
        }

        if self.submission.progress_tick_ms == 0 || self.submission.progress_step == 0 {
            return Err(ConfigError::Invalid(
                "Submission progress tick and step must be non-zero".to_string(),
            ));
        }
        if self.submission.progress_cap >= 100 {
            return Err(ConfigError::Invalid(format!(
                "Progress cap must stay below 100, got {}",
                self.submission.progress_cap
            )));
        }

        if self.api.page_size == 0 {
            return Err(ConfigError::Invalid("API page size must be non-zero".to_string()));
        }

        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            constraints: CaptureConstraints {
                ideal: Resolution {
                    width: self.camera.width,
                    height: self.camera.height,
                },
                facing: self.camera.facing,
                device_index: self.camera.device_index,
                frame_rate: self.camera.frame_rate,
            },
            surface_ready_timeout: Duration::from_millis(self.camera.surface_ready_timeout_ms),
            window: RecordingWindow::new(self.recording.duration_ms, self.recording.timeslice_ms),
            formats: self.recording.preferred_formats.clone(),
            filename: self.recording.filename.clone(),
        }
    }
}
