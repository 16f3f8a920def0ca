//! HTTP enrollment client.
//!
//! Talks to the attendance backend over REST. Uploads are multipart and the
//! video part is streamed so real transfer progress can be reported.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    ApiError, AuthContext, EnrollmentApi, EnrollmentResponse, ProgressSink, RecognitionResponse,
    SubjectPage, UploadProgress,
};
use crate::artifact::RecordedArtifact;

/// Size of each streamed upload chunk
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// REST client for the enrollment backend
pub struct HttpEnrollmentClient {
    base_url: String,
    client: Client,
    auth: AuthContext,
}

impl HttpEnrollmentClient {
    /// Create a client for the given base URL (e.g. "http://localhost:8000/api").
    pub fn new(base_url: &str, auth: AuthContext, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Read a JSON body, turning non-2xx answers into `Rejected`.
    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|body| {
                    body.get("message")
                        .or_else(|| body.get("detail"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Request failed")
                        .to_string()
                });
            return Err(ApiError::Rejected {
                status: Some(status.as_u16()),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Stream `bytes` in chunks, reporting each chunk as it is pulled by the
/// transport.
fn progress_body(bytes: Bytes, progress: ProgressSink) -> Body {
    let total = bytes.len() as u64;
    let sent = Arc::new(AtomicU64::new(0));
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_BYTES).min(bytes.len())))
        .collect();

    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        let now = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        progress(UploadProgress { sent: now, total });
        Ok::<Bytes, std::io::Error>(chunk)
    }));

    Body::wrap_stream(stream)
}

#[async_trait]
impl EnrollmentApi for HttpEnrollmentClient {
    fn reports_upload_progress(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self, artifact, progress), fields(endpoint = "face/enroll", size = artifact.size()))]
    async fn enroll(
        &self,
        subject_id: &str,
        artifact: &RecordedArtifact,
        progress: ProgressSink,
    ) -> Result<EnrollmentResponse, ApiError> {
        let total = artifact.size() as u64;
        let video = Part::stream_with_length(progress_body(artifact.bytes(), progress), total)
            .file_name(artifact.filename().to_string())
            .mime_str(artifact.mime_type())?;

        let form = Form::new()
            .part("video", video)
            .text("subject_id", subject_id.to_string());

        let request = self.auth.authorize(self.client.post(self.url("face/enroll")).multipart(form));
        let response = request.send().await?;
        let body: EnrollmentResponse = Self::read_json(response).await?;

        if !body.success {
            return Err(ApiError::Rejected {
                status: None,
                message: body.message,
            });
        }

        tracing::info!("Enrollment accepted for subject {}", subject_id);
        Ok(body)
    }

    #[tracing::instrument(skip(self, image), fields(endpoint = "face/recognize", size = image.len()))]
    async fn recognize(&self, image: Bytes, mime_type: &str) -> Result<RecognitionResponse, ApiError> {
        let part = Part::bytes(image.to_vec())
            .file_name("capture")
            .mime_str(mime_type)?;
        let form = Form::new().part("image", part);

        let request = self.auth.authorize(self.client.post(self.url("face/recognize")).multipart(form));
        let response = request.send().await?;
        Self::read_json(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_subjects(&self, page: u32, per_page: u32) -> Result<SubjectPage, ApiError> {
        let request = self
            .client
            .get(self.url("subjects"))
            .query(&[("page", page), ("per_page", per_page)]);
        let response = self.auth.authorize(request).send().await?;
        Self::read_json(response).await
    }
}
