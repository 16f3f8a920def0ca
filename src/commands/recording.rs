//! Camera commands

use std::path::Path;
use tokio::sync::broadcast;

use super::enrollment::submit_with_progress;
use super::{camera_backend, emit, CommandContext};
use crate::capture::CaptureEvent;
use crate::session::{CaptureMethod, EnrollmentSession};
use crate::utils::error::AppResult;

/// Get list of available cameras
pub fn cameras() -> AppResult<()> {
    emit(&camera_backend().list_cameras())
}

/// Open the camera, record one window and optionally enroll it
pub async fn record(
    ctx: &CommandContext,
    subject_id: &str,
    output: Option<&Path>,
    submit: bool,
) -> AppResult<()> {
    let session = ctx.session().await;
    session.select_subject(Some(subject_id)).await;
    session.select_method(CaptureMethod::Camera).await;

    let result = record_with(&session, output, submit).await;
    // Release the camera whatever happened.
    session.shutdown().await;
    result
}

async fn record_with(session: &EnrollmentSession, output: Option<&Path>, submit: bool) -> AppResult<()> {
    if !session.capture().is_active() {
        session.start_camera().await?;
    }

    let events = session.capture().subscribe();
    let logger = tokio::spawn(log_capture_events(events));

    let recorded = session.record().await;
    logger.abort();
    let summary = recorded?;
    tracing::info!("Recorded {} bytes of {}", summary.size, summary.mime_type);

    if let (Some(path), Some(artifact)) = (output, session.artifact()) {
        tokio::fs::write(path, artifact.bytes()).await?;
        tracing::info!("Saved recording to {}", path.display());
    }

    if submit {
        submit_with_progress(session).await
    } else {
        emit(&summary)
    }
}

/// Log capture events until the channel closes. Returns how many were seen.
async fn log_capture_events(mut events: broadcast::Receiver<CaptureEvent>) -> usize {
    let mut seen = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                seen += 1;
                match event {
                    CaptureEvent::RecordingProgress(p) if p % 20 == 0 => {
                        tracing::info!("Recording {}%", p)
                    }
                    CaptureEvent::Error(message) => tracing::error!("Capture error: {}", message),
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Capture event log skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_log_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        for p in [2, 4, 6, 8, 10] {
            tx.send(CaptureEvent::RecordingProgress(p)).unwrap();
        }
        tx.send(CaptureEvent::Error("encoder stalled".to_string())).unwrap();
        drop(tx);

        // The four oldest were overwritten; the last two still arrive.
        assert_eq!(log_capture_events(rx).await, 2);
    }
}
