//! Native webcam backend using nokhwa
//!
//! The camera is opened and read on a dedicated thread; frames are fanned
//! out through a broadcast channel so the encoder can subscribe.

use async_trait::async_trait;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};

use super::controller::CaptureError;
use super::traits::{
    CameraBackend, CameraInfo, CaptureConstraints, FrameReceiver, MediaStream, PixelFormat,
    Resolution, VideoFrame,
};

/// Camera backend for the local machine
#[derive(Debug, Default)]
pub struct NokhwaCameraBackend;

impl NokhwaCameraBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CameraBackend for NokhwaCameraBackend {
    fn list_cameras(&self) -> Vec<CameraInfo> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras
                .into_iter()
                .map(|info| {
                    let id = match info.index() {
                        CameraIndex::Index(i) => i.to_string(),
                        CameraIndex::String(s) => s.to_string(),
                    };
                    CameraInfo {
                        id,
                        name: info.human_name().to_string(),
                        supported_resolutions: vec![
                            Resolution { width: 1280, height: 720 },
                            Resolution { width: 640, height: 480 },
                        ],
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frame_tx, _) = broadcast::channel(32);
        let running = Arc::new(AtomicBool::new(true));

        let index = CameraIndex::Index(constraints.device_index);
        let ideal = constraints.ideal;
        let fps = constraints.frame_rate;

        let thread = {
            let frame_tx = frame_tx.clone();
            let running = running.clone();
            std::thread::spawn(move || capture_loop(index, ideal, fps, ready_tx, frame_tx, running))
        };

        let negotiated = ready_rx
            .await
            .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".to_string()))?
            .map_err(CaptureError::DeviceUnavailable)?;

        Ok(Box::new(NokhwaStream {
            id: format!("nokhwa-{}", uuid::Uuid::new_v4()),
            negotiated,
            frame_tx,
            running,
            thread: Mutex::new(Some(thread)),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    resolution: Resolution,
    frame_rate: u32,
    pixel_format: PixelFormat,
}

fn capture_loop(
    index: CameraIndex,
    ideal: Resolution,
    fps: u32,
    ready_tx: oneshot::Sender<Result<Negotiated, String>>,
    frame_tx: broadcast::Sender<VideoFrame>,
    running: Arc<AtomicBool>,
) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        CameraFormat::new_from(ideal.width, ideal.height, FrameFormat::YUYV, fps),
    ));

    let mut camera = match Camera::new(index.clone(), requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("Failed to open camera {:?}: {}", index, e)));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready_tx.send(Err(format!("Failed to open camera stream: {}", e)));
        return;
    }

    let camera_format = camera.camera_format();
    let pixel_format = match camera_format.format() {
        FrameFormat::YUYV => PixelFormat::Yuyv422,
        FrameFormat::NV12 => PixelFormat::Nv12,
        FrameFormat::RAWRGB => PixelFormat::Rgb24,
        FrameFormat::MJPEG => PixelFormat::Mjpeg,
        other => {
            tracing::warn!("Unknown camera format {:?}, treating as yuyv422", other);
            PixelFormat::Yuyv422
        }
    };
    let negotiated = Negotiated {
        resolution: Resolution {
            width: camera_format.resolution().width(),
            height: camera_format.resolution().height(),
        },
        frame_rate: camera_format.frame_rate(),
        pixel_format,
    };

    tracing::info!(
        "Webcam opened: {}x{} @ {}fps, format={:?}",
        negotiated.resolution.width,
        negotiated.resolution.height,
        negotiated.frame_rate,
        camera_format.format()
    );

    if ready_tx.send(Ok(negotiated)).is_err() {
        // Nobody is waiting for this stream any more.
        let _ = camera.stop_stream();
        return;
    }

    let opened = Instant::now();
    let mut frame_count: u64 = 0;
    while running.load(Ordering::SeqCst) {
        match camera.frame() {
            Ok(frame) => {
                let _ = frame_tx.send(VideoFrame {
                    width: negotiated.resolution.width,
                    height: negotiated.resolution.height,
                    format: negotiated.pixel_format,
                    data: bytes::Bytes::copy_from_slice(frame.buffer()),
                    timestamp: opened.elapsed(),
                });
                frame_count += 1;
            }
            Err(e) => tracing::debug!("Failed to capture frame: {:?}", e),
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
    tracing::info!(
        "Webcam released after {} frames in {:.2}s",
        frame_count,
        opened.elapsed().as_secs_f64()
    );
}

/// A live nokhwa stream. One video track.
pub struct NokhwaStream {
    id: String,
    negotiated: Negotiated,
    frame_tx: broadcast::Sender<VideoFrame>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl MediaStream for NokhwaStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn resolution(&self) -> Resolution {
        self.negotiated.resolution
    }

    fn frame_rate(&self) -> u32 {
        self.negotiated.frame_rate
    }

    fn pixel_format(&self) -> PixelFormat {
        self.negotiated.pixel_format
    }

    fn frames(&self) -> FrameReceiver {
        self.frame_tx.subscribe()
    }

    fn live_tracks(&self) -> usize {
        usize::from(self.running.load(Ordering::SeqCst))
    }

    fn stop_all_tracks(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // The capture thread checks the flag between frames.
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        join_capture_thread(handle);
    }
}

/// Join the capture thread, off the runtime when called from inside one
fn join_capture_thread(handle: std::thread::JoinHandle<()>) {
    let join = move || {
        if handle.join().is_err() {
            tracing::warn!("Capture thread panicked");
        }
    };
    match tokio::runtime::Handle::try_current() {
        // Never block a runtime worker on the capture thread.
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop_all_tracks();
    }
}
