//! Command-line handlers
//!
//! Each subcommand builds an [`EnrollmentSession`] from the loaded config
//! and drives it the way an interactive frontend would.

pub mod enrollment;
pub mod recording;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{AuthContext, EnrollmentApi, HttpEnrollmentClient};
use crate::capture::traits::{CameraBackend, CameraInfo, CaptureConstraints, MediaStream};
use crate::capture::{CaptureController, CaptureError, ReadinessSurface};
use crate::config::PipelineConfig;
use crate::recorder::ffmpeg::FfmpegEncoderFactory;
use crate::session::EnrollmentSession;
use crate::utils::error::AppResult;

#[derive(Debug, Parser)]
#[command(name = "attendance-capture", version, about = "Face enrollment capture and upload")]
pub struct Cli {
    /// Pipeline config (TOML)
    #[arg(short, long, env = "ATTENDANCE_CAPTURE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, env = "ATTENDANCE_API_URL")]
    pub base_url: Option<String>,

    /// Bearer token for the enrollment service
    #[arg(long, env = "ATTENDANCE_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List enrollable subjects
    Subjects {
        /// Only subjects without an enrolled face
        #[arg(long)]
        pending: bool,
    },

    /// Enroll a subject from a video file
    Enroll {
        #[arg(short, long)]
        subject: String,

        /// Video file to upload
        file: PathBuf,
    },

    /// Record a clip from the camera and optionally enroll it
    Record {
        #[arg(short, long)]
        subject: String,

        /// Also write the clip to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record only, do not upload
        #[arg(long)]
        no_submit: bool,
    },

    /// Match a still image against enrolled subjects
    Recognize {
        /// Image file (jpeg or png)
        image: PathBuf,
    },

    /// List attached cameras
    Cameras,
}

/// Shared state for one CLI invocation
pub struct CommandContext {
    pub config: PipelineConfig,
    pub api: Arc<dyn EnrollmentApi>,
}

impl CommandContext {
    pub fn new(config: PipelineConfig, token: Option<String>) -> AppResult<Self> {
        let client = HttpEnrollmentClient::new(
            &config.api.base_url,
            AuthContext::new(token),
            Duration::from_secs(config.api.timeout_secs),
        )?;
        Ok(Self {
            config,
            api: Arc::new(client),
        })
    }

    /// Session wired to the local camera (when built with one) and ffmpeg
    pub async fn session(&self) -> EnrollmentSession {
        let encoders = FfmpegEncoderFactory::detect().await;
        let capture = CaptureController::new(
            camera_backend(),
            Arc::new(ReadinessSurface::ready_now()),
            Arc::new(encoders),
            self.config.capture_settings(),
        );
        EnrollmentSession::new(Arc::new(capture), self.api.clone(), &self.config)
    }
}

pub async fn dispatch(ctx: &CommandContext, command: Command) -> AppResult<()> {
    match command {
        Command::Subjects { pending } => enrollment::subjects(ctx, pending).await,
        Command::Enroll { subject, file } => enrollment::enroll(ctx, &subject, &file).await,
        Command::Record {
            subject,
            output,
            no_submit,
        } => recording::record(ctx, &subject, output.as_deref(), !no_submit).await,
        Command::Recognize { image } => enrollment::recognize(ctx, &image).await,
        Command::Cameras => recording::cameras(),
    }
}

/// Print a value as pretty JSON on stdout
pub(crate) fn emit<T: Serialize>(value: &T) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    println!("{}", json);
    Ok(())
}

#[cfg(feature = "native-camera")]
fn camera_backend() -> Arc<dyn CameraBackend> {
    Arc::new(crate::capture::native::NokhwaCameraBackend::new())
}

#[cfg(not(feature = "native-camera"))]
fn camera_backend() -> Arc<dyn CameraBackend> {
    Arc::new(NoCamera)
}

/// Backend for builds without camera support
#[cfg_attr(feature = "native-camera", allow(dead_code))]
struct NoCamera;

#[async_trait]
impl CameraBackend for NoCamera {
    fn list_cameras(&self) -> Vec<CameraInfo> {
        Vec::new()
    }

    async fn open(&self, _constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "built without camera support (enable the native-camera feature)".to_string(),
        ))
    }
}
