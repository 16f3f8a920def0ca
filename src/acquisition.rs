//! File acquisition path
//!
//! A pre-recorded video can stand in for a camera recording. Picker
//! selection and drag-and-drop both go through [`FileValidator::accept`],
//! so the acceptance rules cannot drift between entry points.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::artifact::{ArtifactSource, RecordedArtifact};

/// Largest accepted upload (10 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// How the file reached us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileEntry {
    Picker,
    DragDrop,
}

/// File validation errors. These never reach the network.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Not a video file: {declared_type}")]
    InvalidType { declared_type: String },

    #[error("File is too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("No file was provided")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A user-supplied file before validation
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    /// Declared mime type, as reported by the picker or drop event
    pub declared_type: String,
    pub size: u64,
    pub bytes: Bytes,
}

impl FileCandidate {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }

    /// Read a file from disk, declaring its type from the extension
    pub async fn from_path(path: &Path) -> Result<Self, FileError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(name, declared_type_for(path), Bytes::from(bytes)))
    }
}

/// Mime type for a path, judged by extension only
pub fn declared_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Validates user-supplied files
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_bytes: u64,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_BYTES)
    }
}

impl FileValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Validate a file and turn it into an artifact
    pub fn accept(&self, file: FileCandidate, entry: FileEntry) -> Result<RecordedArtifact, FileError> {
        if !file.declared_type.starts_with("video/") {
            tracing::warn!(
                "Rejected {:?} file {}: type {}",
                entry,
                file.name,
                file.declared_type
            );
            return Err(FileError::InvalidType {
                declared_type: file.declared_type,
            });
        }

        if file.size > self.max_bytes {
            tracing::warn!(
                "Rejected {:?} file {}: {} bytes over limit {}",
                entry,
                file.name,
                file.size,
                self.max_bytes
            );
            return Err(FileError::TooLarge {
                size: file.size,
                limit: self.max_bytes,
            });
        }

        tracing::info!(
            "Accepted {:?} file {} ({}, {} bytes)",
            entry,
            file.name,
            file.declared_type,
            file.size
        );
        Ok(RecordedArtifact::new(
            file.bytes,
            file.declared_type,
            ArtifactSource::Upload,
            file.name,
        ))
    }

    /// Validate a file on disk. Type and size are judged from the path and
    /// metadata before any content is read.
    pub async fn accept_path(&self, path: &Path, entry: FileEntry) -> Result<RecordedArtifact, FileError> {
        let declared_type = declared_type_for(path);
        if !declared_type.starts_with("video/") {
            tracing::warn!("Rejected {:?} file {}: type {}", entry, path.display(), declared_type);
            return Err(FileError::InvalidType {
                declared_type: declared_type.to_string(),
            });
        }

        let size = tokio::fs::metadata(path).await?.len();
        if size > self.max_bytes {
            tracing::warn!(
                "Rejected {:?} file {}: {} bytes over limit {}",
                entry,
                path.display(),
                size,
                self.max_bytes
            );
            return Err(FileError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        let file = FileCandidate::from_path(path).await?;
        self.accept(file, entry)
    }

    /// File picker entry point
    pub fn accept_picked(&self, file: FileCandidate) -> Result<RecordedArtifact, FileError> {
        self.accept(file, FileEntry::Picker)
    }

    /// Drag-and-drop entry point. Only the first dropped file is considered.
    pub fn accept_dropped(&self, files: Vec<FileCandidate>) -> Result<RecordedArtifact, FileError> {
        let file = files.into_iter().next().ok_or(FileError::Empty)?;
        self.accept(file, FileEntry::DragDrop)
    }
}
