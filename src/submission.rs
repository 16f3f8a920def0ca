//! Enrollment submission pipeline
//!
//! Uploads an artifact for a subject while feeding a progress indicator.
//! Progress is capped below 100% until the remote call has resolved; only a
//! real response moves it to 100.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{ApiError, EnrollmentApi, EnrollmentResponse, ProgressSink, UploadProgress};
use crate::artifact::{ArtifactSummary, RecordedArtifact};
use crate::config::SubmissionConfig;

/// Status of the current submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Snapshot of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub subject_id: String,
    pub artifact: ArtifactSummary,
    pub progress_percent: u8,
    pub status: SubmissionStatus,
    /// Remote error text, verbatim, when the submission failed
    pub error: Option<String>,
}

/// Why a submit call did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSubject,
    NoArtifact,
    InFlight,
}

/// Result of a submit call that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Succeeded(EnrollmentResponse),
    Skipped(SkipReason),
}

/// Simulated progress timing
#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    pub tick: Duration,
    pub step: u8,
    pub cap: u8,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self::from(&SubmissionConfig::default())
    }
}

impl From<&SubmissionConfig> for ProgressSettings {
    fn from(config: &SubmissionConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.progress_tick_ms),
            step: config.progress_step,
            cap: config.progress_cap.min(99),
        }
    }
}

/// Message recorded when a submit future is dropped before the response
const CANCELLED_MESSAGE: &str = "Submission cancelled";

/// Ends the submission however `submit` exits. A submission still marked
/// `Submitting` at that point was cancelled mid-flight.
struct InFlightGuard<'a>(&'a SubmissionPipeline);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let pipeline = self.0;
        if pipeline.status() == SubmissionStatus::Submitting {
            tracing::warn!("Submission dropped before the service responded");
            pipeline.progress_tx.send_replace(0);
            pipeline.finish(SubmissionStatus::Failed, Some(CANCELLED_MESSAGE.to_string()));
        }
        pipeline.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Simulated progress task, aborted when dropped
struct ProgressTicker(JoinHandle<()>);

impl ProgressTicker {
    fn spawn(progress_tx: watch::Sender<u8>, settings: ProgressSettings) -> Self {
        Self(tokio::spawn(simulate_progress(progress_tx, settings)))
    }

    async fn stop(mut self) {
        self.0.abort();
        let _ = (&mut self.0).await;
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Uploads artifacts to the enrollment service
pub struct SubmissionPipeline {
    api: Arc<dyn EnrollmentApi>,
    settings: ProgressSettings,
    in_flight: AtomicBool,
    progress_tx: watch::Sender<u8>,
    request: RwLock<Option<EnrollmentRequest>>,
}

impl SubmissionPipeline {
    pub fn new(api: Arc<dyn EnrollmentApi>, settings: ProgressSettings) -> Self {
        let (progress_tx, _) = watch::channel(0);
        Self {
            api,
            settings,
            in_flight: AtomicBool::new(false),
            progress_tx,
            request: RwLock::new(None),
        }
    }

    pub fn api(&self) -> &Arc<dyn EnrollmentApi> {
        &self.api
    }

    /// Current progress in percent
    pub fn progress(&self) -> u8 {
        *self.progress_tx.borrow()
    }

    /// Watch progress updates
    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress_tx.subscribe()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SubmissionStatus {
        self.request
            .read()
            .as_ref()
            .map(|r| r.status)
            .unwrap_or_default()
    }

    /// Latest submission snapshot
    pub fn current_request(&self) -> Option<EnrollmentRequest> {
        let mut request = self.request.read().clone()?;
        request.progress_percent = self.progress();
        Some(request)
    }

    /// Drop the finished request and zero the progress bar
    pub fn reset(&self) {
        if self.is_submitting() {
            return;
        }
        *self.request.write() = None;
        self.progress_tx.send_replace(0);
    }

    /// Submit `artifact` for `subject_id`.
    ///
    /// With no subject, no artifact, or another submission in flight this
    /// logs a warning and does nothing.
    pub async fn submit(
        &self,
        subject_id: Option<&str>,
        artifact: Option<&RecordedArtifact>,
    ) -> Result<SubmitOutcome, ApiError> {
        let Some(subject_id) = subject_id else {
            tracing::warn!("Submit ignored: no subject selected");
            return Ok(SubmitOutcome::Skipped(SkipReason::NoSubject));
        };
        let Some(artifact) = artifact else {
            tracing::warn!("Submit ignored: nothing recorded or uploaded for {}", subject_id);
            return Ok(SubmitOutcome::Skipped(SkipReason::NoArtifact));
        };
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Submit ignored: a submission is already in flight");
            return Ok(SubmitOutcome::Skipped(SkipReason::InFlight));
        }
        let _guard = InFlightGuard(self);

        *self.request.write() = Some(EnrollmentRequest {
            subject_id: subject_id.to_string(),
            artifact: ArtifactSummary::from(artifact),
            progress_percent: 0,
            status: SubmissionStatus::Submitting,
            error: None,
        });
        self.progress_tx.send_replace(0);

        tracing::info!(
            "Submitting {} ({} bytes, {}) for subject {}",
            artifact.filename(),
            artifact.size(),
            artifact.mime_type(),
            subject_id
        );

        let real_progress = self.api.reports_upload_progress();
        let ticker = (!real_progress)
            .then(|| ProgressTicker::spawn(self.progress_tx.clone(), self.settings));
        let sink = self.progress_sink(real_progress);

        let result = self.api.enroll(subject_id, artifact, sink).await;

        if let Some(ticker) = ticker {
            ticker.stop().await;
        }

        match result {
            Ok(response) => {
                self.progress_tx.send_replace(100);
                self.finish(SubmissionStatus::Succeeded, None);
                tracing::info!("Enrollment succeeded for {}: {}", subject_id, response.message);
                Ok(SubmitOutcome::Succeeded(response))
            }
            Err(e) => {
                self.progress_tx.send_replace(0);
                self.finish(SubmissionStatus::Failed, Some(e.to_string()));
                tracing::error!("Enrollment failed for {}: {}", subject_id, e);
                Err(e)
            }
        }
    }

    fn finish(&self, status: SubmissionStatus, error: Option<String>) {
        if let Some(request) = self.request.write().as_mut() {
            request.status = status;
            request.error = error;
        }
    }

    /// Sink that forwards real transfer progress, held under the cap
    fn progress_sink(&self, enabled: bool) -> ProgressSink {
        if !enabled {
            return Arc::new(|_: UploadProgress| {});
        }
        let progress_tx = self.progress_tx.clone();
        let cap = self.settings.cap;
        Arc::new(move |update: UploadProgress| {
            let percent = update.percent().min(cap);
            progress_tx.send_if_modified(|current| {
                if percent > *current {
                    *current = percent;
                    true
                } else {
                    false
                }
            });
        })
    }
}

/// Advance by `step` every `tick`, never past `cap`
async fn simulate_progress(progress_tx: watch::Sender<u8>, settings: ProgressSettings) {
    let start = tokio::time::Instant::now() + settings.tick;
    let mut interval = tokio::time::interval_at(start, settings.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let mut capped = false;
        progress_tx.send_modify(|current| {
            *current = current.saturating_add(settings.step).min(settings.cap);
            capped = *current >= settings.cap;
        });
        tracing::trace!("Simulated upload progress {}%", *progress_tx.borrow());
        if capped {
            break;
        }
    }
}
