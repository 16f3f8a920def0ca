//! Enrollment session orchestration
//!
//! `EnrollmentSession` mediates user intent: which subject is being
//! enrolled and how the video is obtained. It drives the capture controller
//! and the file validator to produce an artifact, then hands that artifact
//! to the submission pipeline.

pub mod roster;
pub mod selection;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::acquisition::{FileCandidate, FileEntry, FileValidator};
use crate::api::{EnrollmentApi, RecognitionResponse};
use crate::artifact::{ArtifactSummary, RecordedArtifact};
use crate::capture::{CaptureController, CaptureError, CaptureSessionInfo, CaptureStatus};
use crate::config::PipelineConfig;
use crate::recorder::state::RecordingError;
use crate::submission::{EnrollmentRequest, ProgressSettings, SubmissionPipeline, SubmitOutcome};
use crate::utils::error::{AppError, AppResult};

pub use roster::SubjectRoster;
pub use selection::CaptureMethod;
use selection::Selection;

/// Everything a frontend needs to render the enrollment screen
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub subject_id: Option<String>,
    pub method: CaptureMethod,
    pub artifact: Option<ArtifactSummary>,
    pub capture_status: CaptureStatus,
    pub recording: bool,
    pub recording_progress: u8,
    pub submission: Option<EnrollmentRequest>,
    pub last_error: Option<String>,
}

pub struct EnrollmentSession {
    capture: Arc<CaptureController>,
    validator: FileValidator,
    submissions: SubmissionPipeline,
    roster: SubjectRoster,
    selection: Mutex<Selection>,
    page_size: u32,
}

impl EnrollmentSession {
    pub fn new(
        capture: Arc<CaptureController>,
        api: Arc<dyn EnrollmentApi>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            capture,
            validator: FileValidator::new(config.upload.max_file_bytes),
            submissions: SubmissionPipeline::new(api, ProgressSettings::from(&config.submission)),
            roster: SubjectRoster::default(),
            selection: Mutex::new(Selection::default()),
            page_size: config.api.page_size,
        }
    }

    pub fn capture(&self) -> &Arc<CaptureController> {
        &self.capture
    }

    pub fn submissions(&self) -> &SubmissionPipeline {
        &self.submissions
    }

    pub fn roster(&self) -> &SubjectRoster {
        &self.roster
    }

    pub fn selected_subject(&self) -> Option<String> {
        self.selection.lock().subject.clone()
    }

    pub fn method(&self) -> CaptureMethod {
        self.selection.lock().method
    }

    /// The artifact that `submit` would send
    pub fn artifact(&self) -> Option<RecordedArtifact> {
        self.selection.lock().artifact.clone()
    }

    pub fn state(&self) -> SessionState {
        let selection = self.selection.lock();
        SessionState {
            subject_id: selection.subject.clone(),
            method: selection.method,
            artifact: selection.artifact.as_ref().map(ArtifactSummary::from),
            capture_status: self.capture.status(),
            recording: self.capture.is_recording(),
            recording_progress: self.capture.recording_progress(),
            submission: self.submissions.current_request(),
            last_error: selection.last_error.clone(),
        }
    }

    /// Fetch every page of subjects into the roster
    pub async fn refresh_subjects(&self) -> AppResult<usize> {
        let api = self.submissions.api().clone();
        let mut subjects = Vec::new();
        let mut page = 1;

        loop {
            let batch = api.list_subjects(page, self.page_size).await?;
            let last_page = batch.items.is_empty() || page >= batch.total_pages;
            subjects.extend(batch.items);
            if last_page {
                break;
            }
            page += 1;
        }

        tracing::info!("Loaded {} subjects over {} page(s)", subjects.len(), page);
        let count = subjects.len();
        self.roster.replace(subjects);
        Ok(count)
    }

    /// Choose the subject being enrolled.
    ///
    /// The pending artifact is cleared before the new subject is visible, and
    /// the camera is released.
    pub async fn select_subject(&self, subject_id: Option<&str>) {
        {
            let mut selection = self.selection.lock();
            selection.change_subject(subject_id.map(str::to_string));
        }
        tracing::info!("Selected subject {:?}", subject_id);
        self.capture.stop().await;
    }

    /// Choose how the video is obtained.
    ///
    /// Clears the artifact and releases the camera. Picking the camera with a
    /// subject already chosen opens it again right away.
    pub async fn select_method(&self, method: CaptureMethod) {
        let has_subject = {
            let mut selection = self.selection.lock();
            selection.change_method(method);
            selection.subject.is_some()
        };
        tracing::info!("Selected capture method {:?}", method);
        self.capture.stop().await;

        if method == CaptureMethod::Camera && has_subject && !self.capture.is_active() {
            self.auto_start().await;
        }
    }

    async fn auto_start(&self) {
        match self.capture.start().await {
            Ok(info) => tracing::debug!("Camera auto-started on stream {}", info.stream_id),
            Err(CaptureError::Cancelled) => {
                tracing::debug!("Camera auto-start superseded by a newer selection")
            }
            Err(e) => {
                tracing::warn!("Camera auto-start failed: {}", e);
                self.note_error(&AppError::from(e));
            }
        }
    }

    pub async fn start_camera(&self) -> AppResult<CaptureSessionInfo> {
        let result = self.capture.start().await.map_err(AppError::from);
        self.noted(result)
    }

    pub async fn stop_camera(&self) {
        self.capture.stop().await;
    }

    /// Record a fixed-window clip and make it the pending artifact.
    ///
    /// A clip that finishes after the selection changed is dropped.
    pub async fn record(&self) -> AppResult<ArtifactSummary> {
        let generation = {
            let selection = self.selection.lock();
            if selection.method != CaptureMethod::Camera {
                return Err(RecordingError::NotReady.into());
            }
            selection.generation
        };

        let ticket = match self.capture.start_recording() {
            Ok(ticket) => ticket,
            Err(e) => return self.noted(Err(e.into())),
        };

        let artifact = match ticket.finished().await {
            Ok(artifact) => artifact,
            Err(RecordingError::Discarded) => return Err(RecordingError::Discarded.into()),
            Err(e) => return self.noted(Err(e.into())),
        };

        let summary = ArtifactSummary::from(&artifact);
        if !self.selection.lock().store_artifact(generation, artifact) {
            tracing::info!("Dropping recording {} made for a previous selection", summary.id);
            return Err(RecordingError::Discarded.into());
        }
        Ok(summary)
    }

    /// End the current recording early, keeping what was captured
    pub fn stop_recording(&self) {
        self.capture.stop_recording();
    }

    /// File picker entry point
    pub fn accept_picked(&self, file: FileCandidate) -> AppResult<ArtifactSummary> {
        self.accept(self.validator.accept(file, FileEntry::Picker))
    }

    /// Accept a file on disk through the picker path
    pub async fn accept_path(&self, path: &Path) -> AppResult<ArtifactSummary> {
        let validated = self.validator.accept_path(path, FileEntry::Picker).await;
        self.accept(validated)
    }

    /// Drag-and-drop entry point
    pub fn accept_dropped(&self, files: Vec<FileCandidate>) -> AppResult<ArtifactSummary> {
        self.accept(self.validator.accept_dropped(files))
    }

    fn accept(
        &self,
        validated: Result<RecordedArtifact, crate::acquisition::FileError>,
    ) -> AppResult<ArtifactSummary> {
        let artifact = self.noted(validated.map_err(AppError::from))?;
        let summary = ArtifactSummary::from(&artifact);
        let mut selection = self.selection.lock();
        let generation = selection.generation;
        selection.store_artifact(generation, artifact);
        Ok(summary)
    }

    /// Drop the pending artifact without changing the selection
    pub fn clear_artifact(&self) {
        self.selection.lock().invalidate();
    }

    /// Send the pending artifact for the selected subject.
    ///
    /// On success the subject is flagged as trained, the artifact and camera
    /// are released and the method goes back to the default. On failure the
    /// artifact stays so the user can retry.
    pub async fn submit(&self) -> AppResult<SubmitOutcome> {
        let (subject, artifact, generation) = {
            let selection = self.selection.lock();
            (
                selection.subject.clone(),
                selection.artifact.clone(),
                selection.generation,
            )
        };

        let outcome = match self
            .submissions
            .submit(subject.as_deref(), artifact.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.noted(Err(e.into())),
        };

        if let (SubmitOutcome::Succeeded(_), Some(subject_id)) = (&outcome, subject.as_deref()) {
            if !self.roster.mark_trained(subject_id) {
                tracing::debug!("Subject {} not in roster, nothing to flag", subject_id);
            }

            let reset = {
                let mut selection = self.selection.lock();
                if selection.generation == generation {
                    selection.change_method(CaptureMethod::default());
                    true
                } else {
                    false
                }
            };
            if reset {
                self.capture.stop().await;
            }
        }

        Ok(outcome)
    }

    /// Match a still image against enrolled subjects
    pub async fn recognize(&self, image: Bytes, mime_type: &str) -> AppResult<RecognitionResponse> {
        let result = self
            .submissions
            .api()
            .recognize(image, mime_type)
            .await
            .map_err(AppError::from);
        self.noted(result)
    }

    /// Release the camera before the session goes away
    pub async fn shutdown(&self) {
        self.capture.stop().await;
    }

    fn note_error(&self, error: &AppError) {
        self.selection.lock().last_error = Some(error.to_string());
    }

    fn noted<T>(&self, result: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &result {
            self.note_error(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::FileError;
    use crate::api::ApiError;
    use crate::artifact::ArtifactSource;
    use crate::capture::surface::ReadinessSurface;
    use crate::capture::CaptureSettings;
    use crate::submission::SkipReason;
    use crate::test_support::{subject, FakeApi, FakeCamera, FakeEncoderFactory};
    use std::time::Duration;

    struct Harness {
        session: Arc<EnrollmentSession>,
        camera: Arc<FakeCamera>,
        api: Arc<FakeApi>,
    }

    fn harness(api: FakeApi) -> Harness {
        let camera = Arc::new(FakeCamera::new());
        let capture = Arc::new(CaptureController::new(
            camera.clone(),
            Arc::new(ReadinessSurface::ready_now()),
            Arc::new(FakeEncoderFactory::default()),
            CaptureSettings::default(),
        ));
        let api = Arc::new(api.with_subjects(vec![
            subject("S1", "Ada Lovelace", false),
            subject("S2", "Alan Turing", false),
            subject("T1", "Grace Hopper", true),
        ]));
        let session = Arc::new(EnrollmentSession::new(
            capture,
            api.clone(),
            &PipelineConfig::default(),
        ));
        Harness { session, camera, api }
    }

    fn upload(size: usize) -> FileCandidate {
        FileCandidate::new("face.mp4", "video/mp4", Bytes::from(vec![1u8; size]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_five_seconds_for_subject() {
        let h = harness(FakeApi::new());
        h.session.refresh_subjects().await.unwrap();
        h.session.select_subject(Some("S1")).await;
        h.session.start_camera().await.unwrap();

        let started = tokio::time::Instant::now();
        let summary = h.session.record().await.unwrap();

        assert!(started.elapsed() <= Duration::from_millis(5000));
        assert_eq!(summary.mime_type, "video/webm");
        assert_eq!(summary.filename, "face_video.webm");
        assert_eq!(summary.source, ArtifactSource::Camera);

        let state = h.session.state();
        assert_eq!(state.artifact.map(|a| a.id), Some(summary.id));
        assert_eq!(state.capture_status, CaptureStatus::Active);
        assert_eq!(h.camera.live_tracks(), 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_sets_no_artifact() {
        let h = harness(FakeApi::new());
        h.session.select_subject(Some("S1")).await;
        h.session.select_method(CaptureMethod::Upload).await;

        let err = h.session.accept_picked(upload(15 * 1024 * 1024)).unwrap_err();
        assert!(matches!(err, AppError::File(FileError::TooLarge { .. })));
        assert!(h.session.artifact().is_none());
        assert!(h.session.state().last_error.is_some());
        assert_eq!(h.api.enroll_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_submit_marks_trained_and_resets() {
        let h = harness(FakeApi::new().with_delay(Duration::from_millis(600)));
        h.session.refresh_subjects().await.unwrap();
        h.session.select_subject(Some("S1")).await;
        h.session.start_camera().await.unwrap();
        h.session.record().await.unwrap();

        let outcome = h.session.submit().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Succeeded(_)));

        assert!(h.session.roster().get("S1").unwrap().trained);
        assert!(h.session.artifact().is_none());
        assert_eq!(h.session.method(), CaptureMethod::Camera);
        assert_eq!(h.session.capture().status(), CaptureStatus::Idle);
        assert_eq!(h.camera.live_tracks(), 0);
        assert_eq!(h.session.submissions().progress(), 100);
        assert_eq!(h.api.enrolled(), vec!["S1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submit_keeps_artifact() {
        let h = harness(
            FakeApi::new()
                .with_delay(Duration::from_millis(400))
                .failing_with(ApiError::Network("connection refused".to_string())),
        );
        h.session.refresh_subjects().await.unwrap();
        h.session.select_subject(Some("S1")).await;
        h.session.select_method(CaptureMethod::Upload).await;
        let accepted = h.session.accept_picked(upload(2048)).unwrap();

        let err = h.session.submit().await.unwrap_err();
        assert_eq!(err.code(), "NETWORK_FAILURE");
        assert_eq!(err.to_string(), "connection refused");

        let state = h.session.state();
        assert_eq!(state.artifact.map(|a| a.id), Some(accepted.id));
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
        assert_eq!(h.session.submissions().progress(), 0);
        assert!(!h.session.roster().get("S1").unwrap().trained);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_upload_mid_recording_discards() {
        let h = harness(FakeApi::new());
        h.session.select_subject(Some("S1")).await;
        h.session.start_camera().await.unwrap();

        let recording = {
            let session = h.session.clone();
            tokio::spawn(async move { session.record().await })
        };
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(h.session.capture().is_recording());

        h.session.select_method(CaptureMethod::Upload).await;

        let result = recording.await.unwrap();
        assert!(matches!(result, Err(AppError::Recording(RecordingError::Discarded))));
        assert_eq!(h.camera.live_tracks(), 0);
        assert_eq!(h.session.capture().status(), CaptureStatus::Idle);
        assert!(h.session.artifact().is_none());
    }

    #[tokio::test]
    async fn test_subject_change_clears_artifact() {
        let h = harness(FakeApi::new());
        h.session.select_subject(Some("S1")).await;
        h.session.select_method(CaptureMethod::Upload).await;
        h.session.accept_dropped(vec![upload(512)]).unwrap();
        assert!(h.session.artifact().is_some());

        h.session.select_subject(Some("S2")).await;
        let state = h.session.state();
        assert_eq!(state.subject_id.as_deref(), Some("S2"));
        assert!(state.artifact.is_none());
    }

    #[tokio::test]
    async fn test_camera_method_auto_starts_with_subject() {
        let h = harness(FakeApi::new());

        h.session.select_method(CaptureMethod::Camera).await;
        assert_eq!(h.camera.open_count(), 0);

        h.session.select_subject(Some("S1")).await;
        h.session.select_method(CaptureMethod::Upload).await;
        assert_eq!(h.camera.open_count(), 0);

        h.session.select_method(CaptureMethod::Camera).await;
        assert!(h.session.capture().is_active());
        assert_eq!(h.camera.open_count(), 1);
        assert_eq!(h.camera.live_tracks(), 1);
    }

    #[tokio::test]
    async fn test_submit_without_artifact_is_skipped() {
        let h = harness(FakeApi::new());
        h.session.select_subject(Some("S1")).await;

        let outcome = h.session.submit().await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Skipped(SkipReason::NoArtifact));
        assert_eq!(h.api.enroll_calls(), 0);
    }

    #[tokio::test]
    async fn test_record_in_upload_mode_is_not_ready() {
        let h = harness(FakeApi::new());
        h.session.select_subject(Some("S1")).await;
        h.session.select_method(CaptureMethod::Upload).await;

        let err = h.session.record().await.unwrap_err();
        assert_eq!(err.code(), "NOT_READY");
    }

    #[tokio::test]
    async fn test_recognize_passes_through() {
        let h = harness(FakeApi::new().with_recognition(RecognitionResponse {
            success: true,
            matched_subject_id: Some("T1".to_string()),
            confidence: 0.88,
        }));

        let result = h
            .session
            .recognize(Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(result.matched_subject_id.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_refresh_walks_all_pages() {
        let camera = Arc::new(FakeCamera::new());
        let capture = Arc::new(CaptureController::new(
            camera,
            Arc::new(ReadinessSurface::ready_now()),
            Arc::new(FakeEncoderFactory::default()),
            CaptureSettings::default(),
        ));
        let subjects = (0..5)
            .map(|i| subject(&format!("S{}", i), &format!("Student {}", i), i % 2 == 0))
            .collect();
        let api = Arc::new(FakeApi::new().with_subjects(subjects));
        let mut config = PipelineConfig::default();
        config.api.page_size = 2;
        let session = EnrollmentSession::new(capture, api.clone(), &config);

        assert_eq!(session.refresh_subjects().await.unwrap(), 5);
        assert_eq!(api.list_calls(), 3);
        assert_eq!(session.roster().pending().len(), 2);
    }
}
