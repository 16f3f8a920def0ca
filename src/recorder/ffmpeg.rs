//! FFmpeg-backed encoder
//!
//! Raw frames from the live stream are piped into an `ffmpeg` subprocess
//! that writes WebM to stdout. The recorder drains that output once per
//! timeslice.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::encoder::{EncoderFactory, MediaEncoder, VideoFormat};
use super::state::{RecordingError, RecordingResult};
use crate::capture::traits::{MediaStream, PixelFormat};

/// Map a format string to the FFmpeg encoder that produces it
fn ffmpeg_codec(format: &VideoFormat) -> Option<&'static str> {
    if format.mime_type() != "video/webm" {
        return None;
    }
    match format.codec() {
        Some("vp9") => Some("libvpx-vp9"),
        Some("vp8") | None => Some("libvpx"),
        Some(_) => None,
    }
}

/// Encoder factory that shells out to `ffmpeg`
pub struct FfmpegEncoderFactory {
    program: String,
    encoders: Vec<String>,
}

impl FfmpegEncoderFactory {
    /// Ask the `ffmpeg` on `PATH` which encoders it has
    pub async fn detect() -> Self {
        Self::detect_with_program("ffmpeg").await
    }

    pub async fn detect_with_program(program: impl Into<String>) -> Self {
        let program = program.into();
        let encoders = query_encoders(&program).await;
        tracing::debug!("{} reports {} video encoders", program, encoders.len());
        Self::with_encoders(program, encoders)
    }

    /// Factory with an already-known encoder list
    pub fn with_encoders(program: impl Into<String>, encoders: Vec<String>) -> Self {
        Self {
            program: program.into(),
            encoders,
        }
    }
}

/// Encoder names reported by `program -encoders`
async fn query_encoders(program: &str) -> Vec<String> {
    match Command::new(program)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            parse_encoder_list(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            tracing::warn!("ffmpeg -encoders exited with {}", output.status);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("FFmpeg not found ({}); camera recording unavailable", e);
            Vec::new()
        }
    }
}

/// Pull encoder names out of `ffmpeg -encoders` output.
///
/// Lines look like ` V....D libvpx-vp9   libvpx VP9 (codec vp9)`.
fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            let is_flag_column = flags.len() == 6
                && flags.chars().all(|c| c == '.' || c.is_ascii_uppercase());
            (is_flag_column && flags.starts_with('V') && name != "=").then(|| name.to_string())
        })
        .collect()
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn is_supported(&self, format: &str) -> bool {
        match ffmpeg_codec(&VideoFormat::new(format)) {
            Some(codec) => self.encoders.iter().any(|name| name == codec),
            None => false,
        }
    }

    fn create(
        &self,
        stream: &dyn MediaStream,
        format: &VideoFormat,
    ) -> RecordingResult<Box<dyn MediaEncoder>> {
        let codec = ffmpeg_codec(format)
            .ok_or_else(|| RecordingError::UnsupportedFormat(format.format.clone()))?;
        let encoder = FfmpegEncoder::spawn(&self.program, stream, codec)?;
        Ok(Box::new(encoder))
    }
}

/// A running ffmpeg process fed from a stream's frames
pub struct FfmpegEncoder {
    process: Option<Child>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
    output: Arc<Mutex<BytesMut>>,
    frame_count: Arc<AtomicU64>,
}

impl FfmpegEncoder {
    fn spawn(program: &str, stream: &dyn MediaStream, codec: &str) -> RecordingResult<Self> {
        let resolution = stream.resolution();
        let fps = stream.frame_rate().max(1);
        let pixel_format = stream.pixel_format();

        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        match pixel_format {
            PixelFormat::Mjpeg => {
                args.extend(["-f".into(), "mjpeg".into()]);
            }
            raw => {
                args.extend([
                    "-f".into(),
                    "rawvideo".into(),
                    "-pixel_format".into(),
                    raw.ffmpeg_name().into(),
                    "-video_size".into(),
                    format!("{}x{}", resolution.width, resolution.height),
                ]);
            }
        }
        args.extend([
            "-framerate".into(),
            fps.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
            codec.into(),
            "-deadline".into(),
            "realtime".into(),
            "-b:v".into(),
            "1M".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-f".into(),
            "webm".into(),
            "pipe:1".into(),
        ]);

        let mut process = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = process
            .stdin
            .take()
            .ok_or_else(|| RecordingError::Encoder("ffmpeg stdin unavailable".to_string()))?;
        let mut stdout = process
            .stdout
            .take()
            .ok_or_else(|| RecordingError::Encoder("ffmpeg stdout unavailable".to_string()))?;

        let frame_count = Arc::new(AtomicU64::new(0));
        let output = Arc::new(Mutex::new(BytesMut::new()));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let mut frames = stream.frames();

        let writer = {
            let frame_count = frame_count.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        frame = frames.recv() => match frame {
                            Ok(frame) => {
                                if let Err(e) = stdin.write_all(&frame.data).await {
                                    tracing::warn!("ffmpeg stdin closed: {}", e);
                                    break;
                                }
                                frame_count.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::debug!("Encoder fell behind, skipped {} frames", skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                // Dropping stdin signals EOF so ffmpeg flushes the container.
                let _ = stdin.shutdown().await;
            })
        };

        let reader = {
            let output = output.clone();
            tokio::spawn(async move {
                let mut chunk = vec![0u8; 64 * 1024];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => output.lock().extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            tracing::warn!("Failed reading ffmpeg output: {}", e);
                            break;
                        }
                    }
                }
            })
        };

        tracing::info!(
            "Started FFmpeg encoder: {}x{} @ {}fps, pixel_format={}, codec={}",
            resolution.width,
            resolution.height,
            fps,
            pixel_format.ffmpeg_name(),
            codec
        );

        Ok(Self {
            process: Some(process),
            writer: Some(writer),
            reader: Some(reader),
            stop_tx: Some(stop_tx),
            output,
            frame_count,
        })
    }

    fn drain(&self) -> Bytes {
        self.output.lock().split().freeze()
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn request_data(&mut self) -> RecordingResult<Option<Bytes>> {
        if let Some(process) = self.process.as_mut() {
            if let Some(status) = process.try_wait()? {
                if !status.success() {
                    return Err(RecordingError::Encoder(format!(
                        "ffmpeg exited early with {}",
                        status
                    )));
                }
            }
        }

        let data = self.drain();
        Ok((!data.is_empty()).then_some(data))
    }

    async fn finish(&mut self) -> RecordingResult<Bytes> {
        let Some(mut process) = self.process.take() else {
            return Ok(Bytes::new());
        };

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }

        let status = process.wait().await?;
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }

        if !status.success() {
            tracing::warn!("FFmpeg encoder exited with status {}", status);
        }
        tracing::info!(
            "FFmpeg encoder finished: {} frames",
            self.frame_count.load(Ordering::Relaxed)
        );

        Ok(self.drain())
    }
}
