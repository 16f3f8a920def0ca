//! Device capture controller
//!
//! Owns the one hardware stream a pipeline may have open, and the recording
//! that runs on top of it. Every path out of the active state (stop, failed
//! start, teardown) stops all tracks and tears down the recording timer.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use super::traits::{CameraBackend, CaptureConstraints, MediaStream, RenderSurface, Resolution};
use crate::recorder::encoder::{self, EncoderFactory};
use crate::recorder::session::{self, RecorderShared, RecordingHandle, RecordingJob, RecordingTicket};
use crate::recorder::state::{RecorderState, RecordingError, RecordingResult, RecordingWindow};

/// Status of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Idle,
    Starting,
    Active,
    Error,
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Events emitted by the controller and its recordings
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    CameraStarted { stream_id: String },
    CameraStopped,
    RecordingStarted,
    /// Recording progress update (percent)
    RecordingProgress(u8),
    RecordingCompleted { bytes: usize },
    RecordingDiscarded,
    Error(String),
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Preview surface is not ready")]
    SurfaceUnavailable,

    #[error("Camera is already starting")]
    Busy,

    #[error("Camera start was cancelled by a stop")]
    Cancelled,
}

/// Description of the live session returned by `start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSessionInfo {
    pub stream_id: String,
    pub resolution: Resolution,
    pub frame_rate: u32,
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub constraints: CaptureConstraints,
    /// How long to wait for the surface before the single attach retry
    pub surface_ready_timeout: Duration,
    pub window: RecordingWindow,
    /// Encoder formats in order of preference
    pub formats: Vec<String>,
    /// Logical filename given to recorded artifacts
    pub filename: String,
}

/// Default logical filename for camera recordings
pub const DEFAULT_RECORDING_FILENAME: &str = "face_video.webm";

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            surface_ready_timeout: Duration::from_millis(150),
            window: RecordingWindow::default(),
            formats: encoder::default_formats(),
            filename: DEFAULT_RECORDING_FILENAME.to_string(),
        }
    }
}

#[derive(Default)]
struct Inner {
    status: CaptureStatus,
    stream: Option<Box<dyn MediaStream>>,
    recording: Option<RecordingHandle>,
    /// Bumped by every start and stop so a late acquisition can tell it lost
    generation: u64,
}

/// Owns the camera stream lifecycle
pub struct CaptureController {
    backend: Arc<dyn CameraBackend>,
    surface: Arc<dyn RenderSurface>,
    encoders: Arc<dyn EncoderFactory>,
    settings: CaptureSettings,
    inner: Mutex<Inner>,
    /// Held by `stop` until the discarded recording has finalized
    stop_gate: tokio::sync::Mutex<()>,
    recorder: Arc<RecorderShared>,
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl CaptureController {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        surface: Arc<dyn RenderSurface>,
        encoders: Arc<dyn EncoderFactory>,
        settings: CaptureSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            backend,
            surface,
            encoders,
            settings,
            inner: Mutex::new(Inner::default()),
            stop_gate: tokio::sync::Mutex::new(()),
            recorder: Arc::new(RecorderShared::default()),
            event_tx,
        }
    }

    /// Subscribe to capture events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }

    pub fn status(&self) -> CaptureStatus {
        self.inner.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == CaptureStatus::Active
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    /// Recording progress in percent
    pub fn recording_progress(&self) -> u8 {
        self.recorder.progress()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.state() == RecorderState::Recording
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Open the camera and attach it to the preview surface.
    ///
    /// Returns the existing session when already active.
    pub async fn start(&self) -> Result<CaptureSessionInfo, CaptureError> {
        // Let a stop that is still finalizing a recording finish first.
        drop(self.stop_gate.lock().await);

        let generation = {
            let mut inner = self.inner.lock();
            match inner.status {
                CaptureStatus::Active => {
                    if let Some(stream) = inner.stream.as_ref() {
                        tracing::debug!("Camera already active, reusing stream {}", stream.id());
                        return Ok(session_info(stream.as_ref()));
                    }
                }
                CaptureStatus::Starting => return Err(CaptureError::Busy),
                CaptureStatus::Idle | CaptureStatus::Error => {}
            }
            inner.status = CaptureStatus::Starting;
            inner.generation += 1;
            inner.generation
        };

        tracing::info!(
            "Requesting camera ({}x{}, {:?})",
            self.settings.constraints.ideal.width,
            self.settings.constraints.ideal.height,
            self.settings.constraints.facing
        );

        let stream = match self.backend.open(&self.settings.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Camera acquisition failed: {}", e);
                self.fail_start(generation, &e);
                return Err(match e {
                    CaptureError::DeviceUnavailable(_) => e,
                    other => CaptureError::DeviceUnavailable(other.to_string()),
                });
            }
        };

        if let Err(e) = self.attach_with_retry(stream.id()).await {
            tracing::warn!("Could not attach stream {}: {}", stream.id(), e);
            stream.stop_all_tracks();
            self.fail_start(generation, &e);
            return Err(e);
        }

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.status != CaptureStatus::Starting {
            // A stop arrived while we were waiting on the hardware.
            drop(inner);
            tracing::info!("Camera start superseded, releasing stream {}", stream.id());
            stream.stop_all_tracks();
            if self.surface.attached().as_deref() == Some(stream.id()) {
                self.surface.detach();
            }
            return Err(CaptureError::Cancelled);
        }

        let info = session_info(stream.as_ref());
        inner.status = CaptureStatus::Active;
        inner.stream = Some(stream);
        drop(inner);

        tracing::info!(
            "Camera active: stream {} at {}x{}",
            info.stream_id,
            info.resolution.width,
            info.resolution.height
        );
        let _ = self.event_tx.send(CaptureEvent::CameraStarted {
            stream_id: info.stream_id.clone(),
        });
        Ok(info)
    }

    fn fail_start(&self, generation: u64, error: &CaptureError) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.status == CaptureStatus::Starting {
            inner.status = CaptureStatus::Error;
        }
        drop(inner);
        let _ = self.event_tx.send(CaptureEvent::Error(error.to_string()));
    }

    async fn attach_with_retry(&self, stream_id: &str) -> Result<(), CaptureError> {
        match self.surface.attach(stream_id) {
            Err(CaptureError::SurfaceUnavailable) => {
                tracing::debug!(
                    "Preview surface not ready, waiting up to {}ms",
                    self.settings.surface_ready_timeout.as_millis()
                );
                tokio::time::timeout(self.settings.surface_ready_timeout, self.surface.ready())
                    .await
                    .map_err(|_| CaptureError::SurfaceUnavailable)?;
                self.surface.attach(stream_id)
            }
            other => other,
        }
    }

    /// Release the camera. Idempotent.
    ///
    /// Stops every track and detaches the preview first, then discards any
    /// in-flight recording once its encoder finalizes. A `start` issued
    /// meanwhile waits for the discard to finish.
    pub async fn stop(&self) {
        let _draining = self.stop_gate.lock().await;

        let (stream, recording) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.status = CaptureStatus::Idle;
            (inner.stream.take(), inner.recording.take())
        };

        if let Some(stream) = stream.as_ref() {
            stream.stop_all_tracks();
            if self.surface.attached().as_deref() == Some(stream.id()) {
                self.surface.detach();
            }
            tracing::info!("Camera stopped: stream {}", stream.id());
            let _ = self.event_tx.send(CaptureEvent::CameraStopped);
        }

        if let Some(recording) = recording {
            tracing::info!("Discarding in-flight recording");
            recording.discard().await;
        }
    }

    /// Start a fixed-window recording on the active stream
    pub fn start_recording(&self) -> RecordingResult<RecordingTicket> {
        let mut inner = self.inner.lock();

        let stream = match (inner.status, inner.stream.as_ref()) {
            (CaptureStatus::Active, Some(stream)) => stream,
            _ => return Err(RecordingError::NotReady),
        };

        let busy = match inner.recording.as_ref() {
            Some(handle) => !handle.is_finished() || !self.recorder.state().can_start(),
            None => self.recorder.state() == RecorderState::Recording,
        };
        if busy {
            return Err(RecordingError::AlreadyRecording);
        }

        let format = encoder::select_format(self.encoders.as_ref(), &self.settings.formats)?;
        let encoder = self.encoders.create(stream.as_ref(), &format)?;

        let (handle, ticket) = session::spawn(RecordingJob {
            encoder,
            format,
            window: self.settings.window,
            filename: self.settings.filename.clone(),
            shared: self.recorder.clone(),
            events: self.event_tx.clone(),
        });
        inner.recording = Some(handle);

        Ok(ticket)
    }

    /// Finish the current recording early. No-op when nothing is recording.
    pub fn stop_recording(&self) {
        let inner = self.inner.lock();
        match inner.recording.as_ref() {
            Some(handle) if !handle.is_finished() => {
                tracing::info!("Stopping recording on request");
                handle.request_finish();
            }
            _ => tracing::debug!("stop_recording with no active recorder"),
        }
    }
}

fn session_info(stream: &dyn MediaStream) -> CaptureSessionInfo {
    CaptureSessionInfo {
        stream_id: stream.id().to_string(),
        resolution: stream.resolution(),
        frame_rate: stream.frame_rate(),
    }
}
