//! Recorded artifact
//!
//! The immutable video payload handed to the enrollment service. It is
//! produced by the recorder or by the file acquisition path and is only
//! ever replaced or cleared, never edited in place.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    Camera,
    Upload,
}

/// A finished video payload ready for submission
#[derive(Debug, Clone)]
pub struct RecordedArtifact {
    id: Uuid,
    bytes: Bytes,
    mime_type: String,
    source: ArtifactSource,
    filename: String,
    created_at: DateTime<Utc>,
}

impl RecordedArtifact {
    pub fn new(
        bytes: Bytes,
        mime_type: impl Into<String>,
        source: ArtifactSource,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            mime_type: mime_type.into(),
            source,
            filename: filename.into(),
            created_at: Utc::now(),
        }
    }

    /// Unique id, used to correlate log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Payload. `Bytes` clones share the buffer, so this is cheap.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn source(&self) -> ArtifactSource {
        self.source
    }

    /// Logical filename sent with the upload
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the declared type is a video type
    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}

/// Lightweight description for logs and the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub mime_type: String,
    pub size: usize,
    pub source: ArtifactSource,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

impl From<&RecordedArtifact> for ArtifactSummary {
    fn from(artifact: &RecordedArtifact) -> Self {
        Self {
            id: artifact.id,
            mime_type: artifact.mime_type.clone(),
            size: artifact.size(),
            source: artifact.source,
            filename: artifact.filename.clone(),
            created_at: artifact.created_at,
        }
    }
}
