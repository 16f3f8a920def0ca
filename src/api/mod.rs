//! Remote enrollment service
//!
//! The backend is an opaque collaborator. The pipeline only sees the
//! [`EnrollmentApi`] trait, so tests and alternative transports can stand in
//! for the HTTP client.

pub mod auth;
pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::artifact::RecordedArtifact;

pub use auth::AuthContext;
pub use http::HttpEnrollmentClient;

/// A person eligible for face enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    /// Whether a face sample has been enrolled
    #[serde(default)]
    pub trained: bool,
}

/// One page of the subject listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectPage {
    pub items: Vec<Subject>,
    pub page: u32,
    pub total_pages: u32,
}

/// Response from the enrollment endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Response from the recognition endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    pub success: bool,
    #[serde(default)]
    pub matched_subject_id: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

/// Bytes handed to the transport so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.sent.min(self.total) * 100) / self.total) as u8
    }
}

/// Callback receiving upload progress
pub type ProgressSink = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Errors from the remote service
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// The request never got a usable answer
    #[error("{0}")]
    Network(String),

    /// The service answered and said no
    #[error("{message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ApiError::Decode(error.to_string())
        } else {
            ApiError::Network(error.to_string())
        }
    }
}

/// The enrollment backend
#[async_trait]
pub trait EnrollmentApi: Send + Sync {
    /// Whether `enroll` reports real transfer progress through its sink
    fn reports_upload_progress(&self) -> bool {
        false
    }

    /// Submit a video sample for a subject. `Ok` only when the service
    /// accepted it.
    async fn enroll(
        &self,
        subject_id: &str,
        artifact: &RecordedArtifact,
        progress: ProgressSink,
    ) -> Result<EnrollmentResponse, ApiError>;

    /// Match a still image against enrolled subjects
    async fn recognize(&self, image: Bytes, mime_type: &str) -> Result<RecognitionResponse, ApiError>;

    /// One page of enrollable subjects
    async fn list_subjects(&self, page: u32, per_page: u32) -> Result<SubjectPage, ApiError>;
}
