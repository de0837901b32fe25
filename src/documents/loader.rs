//! Document Loading
//!
//! Reads an uploaded file from disk and extracts its raw text.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Maximum file size (50 MB) accepted by the loader.
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Text formats read as-is.
const TEXT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "text", "rst", "csv", "tsv", "json", "yaml", "yml", "toml",
    "html", "htm", "xml", "log",
];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a file: {0}")]
    NotAFile(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("File too large: {0} bytes (max {1} bytes)")]
    FileTooLarge(u64, u64),
    #[error("Document contains no text: {0}")]
    Empty(String),
}

impl Serialize for LoadError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Identity of a loaded document: its path plus a hash of its text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentId {
    pub path: Arc<str>,
    pub content_hash: u64,
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{:016x}", self.path, self.content_hash)
    }
}

/// Raw extracted text of one document. Never mutated after loading.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    text: String,
}

impl Document {
    pub fn new(path: impl AsRef<str>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            id: DocumentId {
                path: Arc::from(path.as_ref()),
                content_hash: hasher.finish(),
            },
            text,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Boundary collaborator that turns a file path into a [`Document`].
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Document, LoadError>;
}

/// Loads plain-text formats, and PDF when the `pdf` feature is enabled.
#[derive(Debug, Clone)]
pub struct FileLoader {
    max_file_size: u64,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self { max_file_size: MAX_FILE_SIZE }
    }
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    fn read_text(path: &Path) -> Result<String, LoadError> {
        let bytes = fs::read(path)?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    #[cfg(feature = "pdf")]
    fn read_pdf(path: &Path) -> Result<String, LoadError> {
        pdf_extract::extract_text(path).map_err(|e| LoadError::ParseError(e.to_string()))
    }

    #[cfg(not(feature = "pdf"))]
    fn read_pdf(_path: &Path) -> Result<String, LoadError> {
        Err(LoadError::UnsupportedType("pdf".to_string()))
    }
}

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<Document, LoadError> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(LoadError::NotAFile(path.display().to_string()));
        }
        if metadata.len() > self.max_file_size {
            return Err(LoadError::FileTooLarge(metadata.len(), self.max_file_size));
        }

        let extension = path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let text = match extension.as_str() {
            "pdf" => Self::read_pdf(path)?,
            // Extensionless uploads are treated as plain text
            "" => Self::read_text(path)?,
            ext if TEXT_EXTENSIONS.contains(&ext) => Self::read_text(path)?,
            other => return Err(LoadError::UnsupportedType(other.to_string())),
        };

        if text.trim().is_empty() {
            return Err(LoadError::Empty(path.display().to_string()));
        }

        Ok(Document::new(path.to_string_lossy(), text))
    }
}
