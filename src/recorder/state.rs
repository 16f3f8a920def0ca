//! Recording state management
//!
//! Defines the recording state machine, the fixed recording window and
//! the errors a recording attempt can end with.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Current state of the recorder.
///
/// `Ready -> Recording -> Completed`, or `Recording -> Error -> Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No recording in progress
    Ready,
    /// Currently recording
    Recording,
    /// Last recording produced an artifact
    Completed,
    /// Last recording failed; flags are already reset
    Error,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Ready
    }
}

impl RecorderState {
    /// Whether a new recording may begin from this state
    pub fn can_start(&self) -> bool {
        !matches!(self, RecorderState::Recording)
    }
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Progress sampling reached 100%
    ProgressComplete,
    /// The absolute deadline fired first
    Deadline,
    /// The user asked to stop early; the artifact is kept
    UserStop,
    /// The capture session went away; the data is thrown out
    Discarded,
}

/// Signal sent from the controller to a running recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Running,
    Finish,
    Discard,
}

/// Fixed-duration recording window.
///
/// One deadline bounds the recording; progress is sampled from elapsed
/// time against it on every timeslice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingWindow {
    pub duration: Duration,
    pub timeslice: Duration,
}

/// Default recording length
pub const DEFAULT_RECORDING_DURATION_MS: u64 = 5000;

/// Default interval between data requests and progress samples
pub const DEFAULT_TIMESLICE_MS: u64 = 100;

impl Default for RecordingWindow {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(DEFAULT_RECORDING_DURATION_MS),
            timeslice: Duration::from_millis(DEFAULT_TIMESLICE_MS),
        }
    }
}

impl RecordingWindow {
    pub fn new(duration_ms: u64, timeslice_ms: u64) -> Self {
        Self {
            duration: Duration::from_millis(duration_ms),
            timeslice: Duration::from_millis(timeslice_ms),
        }
    }

    /// Percentage gained per timeslice (2 for the 5000/100 window)
    pub fn step_percent(&self) -> u8 {
        let duration = self.duration.as_millis().max(1);
        ((self.timeslice.as_millis() * 100) / duration).min(100) as u8
    }

    /// Progress for a given elapsed time, clamped to 100
    pub fn progress_at(&self, elapsed: Duration) -> u8 {
        let duration = self.duration.as_millis();
        if duration == 0 {
            return 100;
        }
        ((elapsed.as_millis() * 100) / duration).min(100) as u8
    }
}

/// Recording errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Camera is not active")]
    NotReady,

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No supported video format (tried: {0})")]
    UnsupportedFormat(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Recording was discarded")]
    Discarded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_steps_two_percent() {
        let window = RecordingWindow::default();
        assert_eq!(window.duration, Duration::from_millis(5000));
        assert_eq!(window.step_percent(), 2);
        assert_eq!(window.progress_at(Duration::from_millis(100)), 2);
        assert_eq!(window.progress_at(Duration::from_millis(2500)), 50);
    }

    #[test]
    fn test_progress_clamps_at_hundred() {
        let window = RecordingWindow::default();
        assert_eq!(window.progress_at(Duration::from_millis(5000)), 100);
        assert_eq!(window.progress_at(Duration::from_secs(60)), 100);
    }

    #[test]
    fn test_recording_state_transitions() {
        assert!(RecorderState::Ready.can_start());
        assert!(RecorderState::Completed.can_start());
        assert!(RecorderState::Error.can_start());
        assert!(!RecorderState::Recording.can_start());
    }
}
