//! In-memory fakes for the hardware and service seams

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::api::{
    ApiError, EnrollmentApi, EnrollmentResponse, ProgressSink, RecognitionResponse, Subject,
    SubjectPage, UploadProgress,
};
use crate::artifact::RecordedArtifact;
use crate::capture::traits::{
    CameraBackend, CameraInfo, CaptureConstraints, FrameReceiver, MediaStream, PixelFormat,
    Resolution, VideoFrame,
};
use crate::capture::CaptureError;
use crate::recorder::encoder::{EncoderFactory, MediaEncoder, VideoFormat, BASELINE_FORMAT, PREFERRED_FORMAT};
use crate::recorder::state::{RecordingError, RecordingResult};

#[derive(Default)]
struct TrackCounters {
    live: AtomicUsize,
    max_concurrent: AtomicUsize,
    opened: AtomicUsize,
}

/// Camera that hands out fake streams and counts them
pub(crate) struct FakeCamera {
    counters: Arc<TrackCounters>,
    deny: bool,
    open_delay: Option<Duration>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(TrackCounters::default()),
            deny: false,
            open_delay: None,
        }
    }

    /// A camera whose permission prompt is always refused
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::new()
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn live_tracks(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Most streams ever open at the same time
    pub fn max_concurrent(&self) -> usize {
        self.counters.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraBackend for FakeCamera {
    fn list_cameras(&self) -> Vec<CameraInfo> {
        vec![CameraInfo {
            id: "0".to_string(),
            name: "Fake Camera".to_string(),
            supported_resolutions: vec![Resolution { width: 640, height: 480 }],
        }]
    }

    async fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn MediaStream>, CaptureError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny {
            return Err(CaptureError::DeviceUnavailable("Permission denied".to_string()));
        }

        let n = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_concurrent.fetch_max(live, Ordering::SeqCst);

        let (frame_tx, _) = broadcast::channel(4);
        Ok(Box::new(FakeStream {
            id: format!("fake-stream-{}", n),
            resolution: constraints.ideal,
            frame_rate: constraints.frame_rate,
            frame_tx,
            stopped: AtomicBool::new(false),
            counters: self.counters.clone(),
        }))
    }
}

pub(crate) struct FakeStream {
    id: String,
    resolution: Resolution,
    frame_rate: u32,
    frame_tx: broadcast::Sender<VideoFrame>,
    stopped: AtomicBool,
    counters: Arc<TrackCounters>,
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn frames(&self) -> FrameReceiver {
        self.frame_tx.subscribe()
    }

    fn live_tracks(&self) -> usize {
        usize::from(!self.stopped.load(Ordering::SeqCst))
    }

    fn stop_all_tracks(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Encoder factory with a fixed set of supported formats
pub(crate) struct FakeEncoderFactory {
    supported: Vec<String>,
    finished: Arc<AtomicUsize>,
    finish_delay: Option<Duration>,
}

impl Default for FakeEncoderFactory {
    fn default() -> Self {
        Self::supporting(&[PREFERRED_FORMAT, BASELINE_FORMAT])
    }
}

impl FakeEncoderFactory {
    pub fn supporting(formats: &[&str]) -> Self {
        Self {
            supported: formats.iter().map(|f| f.to_string()).collect(),
            finished: Arc::new(AtomicUsize::new(0)),
            finish_delay: None,
        }
    }

    /// Every encoder takes `delay` to finalize
    pub fn with_finish_delay(mut self, delay: Duration) -> Self {
        self.finish_delay = Some(delay);
        self
    }

    /// Encoders created by this factory that have been finalized
    pub fn finished_encoders(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn is_supported(&self, format: &str) -> bool {
        self.supported.iter().any(|f| f == format)
    }

    fn create(
        &self,
        _stream: &dyn MediaStream,
        format: &VideoFormat,
    ) -> RecordingResult<Box<dyn MediaEncoder>> {
        if !self.is_supported(&format.format) {
            return Err(RecordingError::UnsupportedFormat(format.format.clone()));
        }
        let mut encoder = FakeEncoder::new();
        encoder.finished = self.finished.clone();
        encoder.finish_delay = self.finish_delay;
        Ok(Box::new(encoder))
    }
}

/// Start and end instants of a fake encoder
#[derive(Clone)]
pub(crate) struct EncoderClock {
    created_at: Instant,
    finished_at: Arc<Mutex<Option<Instant>>>,
}

impl EncoderClock {
    /// Milliseconds between creation and finish (or now, if still running)
    pub fn captured_ms(&self) -> u64 {
        let finished = *self.finished_at.lock();
        let end = finished.unwrap_or_else(Instant::now);
        end.duration_since(self.created_at).as_millis() as u64
    }
}

/// Encoder producing a small chunk per request
pub(crate) struct FakeEncoder {
    clock: EncoderClock,
    requests: usize,
    request_delay: Option<Duration>,
    stall: Option<(usize, Duration)>,
    fail_on: Option<usize>,
    finish_delay: Option<Duration>,
    finished: Arc<AtomicUsize>,
    done: bool,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            clock: EncoderClock {
                created_at: Instant::now(),
                finished_at: Arc::new(Mutex::new(None)),
            },
            requests: 0,
            request_delay: None,
            stall: None,
            fail_on: None,
            finish_delay: None,
            finished: Arc::new(AtomicUsize::new(0)),
            done: false,
        }
    }

    pub fn clock(&self) -> EncoderClock {
        self.clock.clone()
    }

    /// Every data request takes `delay`
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = Some(delay);
        self
    }

    /// The `nth` data request hangs for `delay`
    pub fn with_stall_on(mut self, nth: usize, delay: Duration) -> Self {
        self.stall = Some((nth, delay));
        self
    }

    /// The `nth` data request fails
    pub fn failing_on(mut self, nth: usize) -> Self {
        self.fail_on = Some(nth);
        self
    }

    /// Number of times this encoder was finalized
    pub fn finish_count(&self) -> Arc<AtomicUsize> {
        self.finished.clone()
    }
}

#[async_trait]
impl MediaEncoder for FakeEncoder {
    async fn request_data(&mut self) -> RecordingResult<Option<Bytes>> {
        self.requests += 1;
        if let Some(delay) = self.request_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((nth, delay)) = self.stall {
            if self.requests == nth {
                tokio::time::sleep(delay).await;
            }
        }
        if self.fail_on == Some(self.requests) {
            return Err(RecordingError::Encoder("fake encoder fault".to_string()));
        }
        Ok(Some(Bytes::from(format!("chunk-{};", self.requests))))
    }

    async fn finish(&mut self) -> RecordingResult<Bytes> {
        if self.done {
            return Ok(Bytes::new());
        }
        self.done = true;
        if let Some(delay) = self.finish_delay {
            tokio::time::sleep(delay).await;
        }
        *self.clock.finished_at.lock() = Some(Instant::now());
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"tail"))
    }
}

/// Enrollment service stand-in
pub(crate) struct FakeApi {
    delay: Duration,
    failure: Option<ApiError>,
    upload_progress: bool,
    subjects: Mutex<Vec<Subject>>,
    recognition: Option<RecognitionResponse>,
    responded: Arc<AtomicBool>,
    enroll_calls: AtomicUsize,
    list_calls: AtomicUsize,
    enrolled: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            failure: None,
            upload_progress: false,
            subjects: Mutex::new(Vec::new()),
            recognition: None,
            responded: Arc::new(AtomicBool::new(false)),
            enroll_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            enrolled: Mutex::new(Vec::new()),
        }
    }

    /// Time the service takes to answer an enrollment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_with(mut self, error: ApiError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Report 50% then 100% of bytes sent during an enrollment
    pub fn with_upload_progress(mut self) -> Self {
        self.upload_progress = true;
        self
    }

    pub fn with_subjects(self, subjects: Vec<Subject>) -> Self {
        *self.subjects.lock() = subjects;
        self
    }

    pub fn with_recognition(mut self, response: RecognitionResponse) -> Self {
        self.recognition = Some(response);
        self
    }

    /// Set once an enrollment response has been produced
    pub fn responded_flag(&self) -> Arc<AtomicBool> {
        self.responded.clone()
    }

    pub fn enroll_calls(&self) -> usize {
        self.enroll_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Subject ids successfully enrolled, in order
    pub fn enrolled(&self) -> Vec<String> {
        self.enrolled.lock().clone()
    }
}

#[async_trait]
impl EnrollmentApi for FakeApi {
    fn reports_upload_progress(&self) -> bool {
        self.upload_progress
    }

    async fn enroll(
        &self,
        subject_id: &str,
        artifact: &RecordedArtifact,
        progress: ProgressSink,
    ) -> Result<EnrollmentResponse, ApiError> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        self.responded.store(false, Ordering::SeqCst);

        if self.upload_progress {
            let total = artifact.size() as u64;
            progress(UploadProgress { sent: total / 2, total });
            tokio::time::sleep(self.delay / 2).await;
            progress(UploadProgress { sent: total, total });
            tokio::time::sleep(self.delay / 2).await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.responded.store(true, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.enrolled.lock().push(subject_id.to_string());
        Ok(EnrollmentResponse {
            success: true,
            message: format!("Enrolled {}", subject_id),
        })
    }

    async fn recognize(&self, _image: Bytes, _mime_type: &str) -> Result<RecognitionResponse, ApiError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.recognition.clone().unwrap_or(RecognitionResponse {
            success: false,
            matched_subject_id: None,
            confidence: 0.0,
        }))
    }

    async fn list_subjects(&self, page: u32, per_page: u32) -> Result<SubjectPage, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let subjects = self.subjects.lock().clone();
        let per_page = per_page.max(1) as usize;
        let total_pages = subjects.len().div_ceil(per_page).max(1) as u32;
        let start = (page.saturating_sub(1) as usize) * per_page;
        let items = subjects.into_iter().skip(start).take(per_page).collect();
        Ok(SubjectPage {
            items,
            page,
            total_pages,
        })
    }
}

pub(crate) fn subject(id: &str, name: &str, trained: bool) -> Subject {
    Subject {
        id: id.to_string(),
        name: name.to_string(),
        trained,
    }
}
