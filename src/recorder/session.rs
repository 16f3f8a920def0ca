//! Timed recording task
//!
//! A recording runs as its own task. It ends at the first of: progress
//! reaching 100%, the absolute deadline, or a stop signal. Both automatic
//! triggers derive from a single deadline computed at start.

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::encoder::{MediaEncoder, VideoFormat};
use super::state::{
    RecorderState, RecordingError, RecordingResult, RecordingWindow, StopReason, StopSignal,
};
use crate::artifact::{ArtifactSource, RecordedArtifact};
use crate::capture::CaptureEvent;

/// Recorder flags shared between the task and its observers
#[derive(Debug, Default)]
pub struct RecorderShared {
    state: RwLock<RecorderState>,
    progress: AtomicU8,
}

impl RecorderShared {
    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: RecorderState) {
        *self.state.write() = state;
    }

    pub(crate) fn set_progress(&self, progress: u8) {
        self.progress.store(progress, Ordering::SeqCst);
    }

    /// Clear the recording flag and progress
    fn reset(&self, state: RecorderState) {
        self.set_progress(0);
        self.set_state(state);
    }
}

/// Everything a recording task needs
pub struct RecordingJob {
    pub encoder: Box<dyn MediaEncoder>,
    pub format: VideoFormat,
    pub window: RecordingWindow,
    pub filename: String,
    pub shared: Arc<RecorderShared>,
    pub events: broadcast::Sender<CaptureEvent>,
}

/// Controller-side handle on a running recording
pub struct RecordingHandle {
    stop_tx: watch::Sender<StopSignal>,
    task: JoinHandle<()>,
}

impl RecordingHandle {
    /// Ask the recording to finish early and keep its data
    pub fn request_finish(&self) {
        self.stop_tx.send_if_modified(|signal| {
            if *signal == StopSignal::Running {
                *signal = StopSignal::Finish;
                true
            } else {
                false
            }
        });
    }

    /// Throw the recording away and wait for the encoder to finalize
    pub async fn discard(self) {
        self.stop_tx.send_replace(StopSignal::Discard);
        if let Err(e) = self.task.await {
            tracing::warn!("Recording task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Awaitable outcome of a recording
pub struct RecordingTicket {
    rx: oneshot::Receiver<RecordingResult<RecordedArtifact>>,
}

impl RecordingTicket {
    /// Wait for the recording to end
    pub async fn finished(self) -> RecordingResult<RecordedArtifact> {
        self.rx.await.unwrap_or(Err(RecordingError::Discarded))
    }
}

/// Spawn the recording task
pub fn spawn(job: RecordingJob) -> (RecordingHandle, RecordingTicket) {
    let (stop_tx, stop_rx) = watch::channel(StopSignal::Running);
    let (result_tx, result_rx) = oneshot::channel();

    job.shared.set_progress(0);
    job.shared.set_state(RecorderState::Recording);
    let _ = job.events.send(CaptureEvent::RecordingStarted);

    let task = tokio::spawn(async move {
        let shared = job.shared.clone();
        let events = job.events.clone();

        let result = run(job, stop_rx).await;
        match &result {
            Ok(artifact) => {
                shared.reset(RecorderState::Completed);
                let _ = events.send(CaptureEvent::RecordingCompleted {
                    bytes: artifact.size(),
                });
            }
            Err(RecordingError::Discarded) => {
                shared.reset(RecorderState::Ready);
                let _ = events.send(CaptureEvent::RecordingDiscarded);
            }
            Err(e) => {
                shared.reset(RecorderState::Error);
                let _ = events.send(CaptureEvent::Error(e.to_string()));
            }
        }

        // Nobody listening is fine; the caller may have walked away.
        let _ = result_tx.send(result);
    });

    (RecordingHandle { stop_tx, task }, RecordingTicket { rx: result_rx })
}

async fn run(
    job: RecordingJob,
    mut stop_rx: watch::Receiver<StopSignal>,
) -> RecordingResult<RecordedArtifact> {
    let RecordingJob {
        mut encoder,
        format,
        window,
        filename,
        shared,
        events,
    } = job;

    let started = Instant::now();
    let deadline = started + window.duration;
    let deadline_sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(deadline_sleep);

    let mut ticker = tokio::time::interval_at(started + window.timeslice, window.timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut buffer = BytesMut::new();

    tracing::info!(
        "Recording started: format={}, window={}ms",
        format.format,
        window.duration.as_millis()
    );

    let reason = 'record: loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                let signal = if changed.is_ok() { *stop_rx.borrow() } else { StopSignal::Discard };
                match signal {
                    StopSignal::Running => continue,
                    StopSignal::Finish => break StopReason::UserStop,
                    StopSignal::Discard => break StopReason::Discarded,
                }
            }

            _ = &mut deadline_sleep => break StopReason::Deadline,

            _ = ticker.tick() => {
                // A slow data request must not push the recording past its deadline.
                let requested = tokio::select! {
                    biased;
                    _ = &mut deadline_sleep => break 'record StopReason::Deadline,
                    requested = encoder.request_data() => requested,
                };

                match requested {
                    Ok(Some(chunk)) => buffer.extend_from_slice(&chunk),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("Encoder failed mid-recording: {}", e);
                        if let Err(finish_err) = encoder.finish().await {
                            tracing::debug!("Encoder finish after failure: {}", finish_err);
                        }
                        return Err(e);
                    }
                }

                let progress = window.progress_at(started.elapsed());
                shared.set_progress(progress);
                let _ = events.send(CaptureEvent::RecordingProgress(progress));
                tracing::trace!("Recording progress {}%", progress);

                if progress >= 100 {
                    break StopReason::ProgressComplete;
                }
            }
        }
    };

    let tail = encoder.finish().await?;

    tracing::info!(
        "Recording stopped after {}ms ({:?})",
        started.elapsed().as_millis(),
        reason
    );

    if reason == StopReason::Discarded {
        return Err(RecordingError::Discarded);
    }

    buffer.extend_from_slice(&tail);
    let bytes: Bytes = buffer.freeze();

    if bytes.is_empty() {
        return Err(RecordingError::Encoder("Encoder produced no data".to_string()));
    }

    Ok(RecordedArtifact::new(
        bytes,
        format.mime_type(),
        ArtifactSource::Camera,
        filename,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEncoder;
    use std::time::Duration;

    fn job(encoder: FakeEncoder) -> (RecordingJob, Arc<RecorderShared>) {
        let shared = Arc::new(RecorderShared::default());
        let (events, _) = broadcast::channel(256);
        (
            RecordingJob {
                encoder: Box::new(encoder),
                format: VideoFormat::new("video/webm;codecs=vp9"),
                window: RecordingWindow::default(),
                filename: "face_video.webm".to_string(),
                shared: shared.clone(),
                events,
            },
            shared,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_completes_at_window() {
        let encoder = FakeEncoder::new();
        let clock = encoder.clock();
        let (job, shared) = job(encoder);
        let started = Instant::now();

        let (_handle, ticket) = spawn(job);
        let artifact = ticket.finished().await.unwrap();

        assert_eq!(artifact.mime_type(), "video/webm");
        assert_eq!(artifact.filename(), "face_video.webm");
        assert_eq!(artifact.source(), ArtifactSource::Camera);
        assert!(started.elapsed() <= Duration::from_millis(5000));
        assert!(clock.captured_ms() <= 5000);
        assert_eq!(shared.state(), RecorderState::Completed);
        assert_eq!(shared.progress(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_holds_under_drift() {
        // Every data request takes 130ms, so ticks drift and get skipped.
        let encoder = FakeEncoder::new().with_request_delay(Duration::from_millis(130));
        let clock = encoder.clock();
        let (job, _shared) = job(encoder);
        let started = Instant::now();

        let (_handle, ticket) = spawn(job);
        ticket.finished().await.unwrap();

        assert!(started.elapsed() <= Duration::from_millis(5000));
        assert!(clock.captured_ms() <= 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_tick_still_stops() {
        let encoder = FakeEncoder::new().with_stall_on(45, Duration::from_millis(900));
        let clock = encoder.clock();
        let (job, _shared) = job(encoder);

        let (_handle, ticket) = spawn(job);
        let artifact = ticket.finished().await.unwrap();

        assert!(artifact.size() > 0);
        assert!(clock.captured_ms() <= 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_stop_keeps_data() {
        let (job, shared) = job(FakeEncoder::new());
        let (handle, ticket) = spawn(job);

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(shared.state(), RecorderState::Recording);
        assert!(shared.progress() >= 20);

        handle.request_finish();
        let artifact = ticket.finished().await.unwrap();
        assert!(artifact.size() > 0);
        assert_eq!(shared.state(), RecorderState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_finalizes_encoder() {
        let encoder = FakeEncoder::new();
        let finished = encoder.finish_count();
        let (job, shared) = job(encoder);
        let (handle, ticket) = spawn(job);

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.discard().await;

        assert!(matches!(ticket.finished().await, Err(RecordingError::Discarded)));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(shared.state(), RecorderState::Ready);
        assert_eq!(shared.progress(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_error_resets_flags() {
        let (job, shared) = job(FakeEncoder::new().failing_on(5));
        let (_handle, ticket) = spawn(job);

        let err = ticket.finished().await.unwrap_err();
        assert!(matches!(err, RecordingError::Encoder(_)));
        assert_eq!(shared.state(), RecorderState::Error);
        assert_eq!(shared.progress(), 0);
    }
}
