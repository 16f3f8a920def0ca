//! Subject and capture-method selection
//!
//! Any change to the subject or method invalidates the pending artifact and
//! bumps a generation counter. Work started under an older generation (a
//! recording that was still running) must not land in the new selection.

use serde::{Deserialize, Serialize};

use crate::artifact::RecordedArtifact;

/// How the enrollment video is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    Camera,
    Upload,
}

impl Default for CaptureMethod {
    fn default() -> Self {
        Self::Camera
    }
}

#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub subject: Option<String>,
    pub method: CaptureMethod,
    pub artifact: Option<RecordedArtifact>,
    pub generation: u64,
    pub last_error: Option<String>,
}

impl Selection {
    pub fn change_subject(&mut self, subject: Option<String>) -> u64 {
        self.subject = subject;
        self.invalidate()
    }

    pub fn change_method(&mut self, method: CaptureMethod) -> u64 {
        self.method = method;
        self.invalidate()
    }

    /// Drop the pending artifact and start a new generation
    pub fn invalidate(&mut self) -> u64 {
        if let Some(artifact) = self.artifact.take() {
            tracing::debug!("Cleared pending artifact {}", artifact.id());
        }
        self.last_error = None;
        self.generation += 1;
        self.generation
    }

    /// Keep `artifact` only if nothing changed since `generation`
    pub fn store_artifact(&mut self, generation: u64, artifact: RecordedArtifact) -> bool {
        if self.generation != generation {
            return false;
        }
        self.artifact = Some(artifact);
        self.last_error = None;
        true
    }
}
