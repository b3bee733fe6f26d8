//! Uploaded input files

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the bytes of an input file live
#[derive(Debug, Clone)]
pub enum FileContent {
    /// Uploaded payload held in memory
    Bytes(Arc<Vec<u8>>),
    /// Server-local file, read on demand
    Path(PathBuf),
}

/// One uploaded file (name + content accessor)
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub content: FileContent,
}

impl InputFile {
    /// Create a file from an in-memory payload
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            modified_at: None,
            content: FileContent::Bytes(Arc::new(bytes)),
        }
    }

    /// Create a file backed by a local path (size and mtime taken from metadata)
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            size: metadata.len(),
            modified_at,
            content: FileContent::Path(path.to_path_buf()),
        })
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Lower-cased extension without the dot ("" when absent)
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Read the full content
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.content {
            FileContent::Bytes(bytes) => Ok(bytes.as_ref().clone()),
            FileContent::Path(path) => tokio::fs::read(path).await,
        }
    }

    /// Read the content as text (invalid UTF-8 replaced)
    pub async fn read_text(&self) -> std::io::Result<String> {
        let bytes = self.read_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
