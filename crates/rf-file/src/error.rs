//! File I/O error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    /// Container structure is invalid (e.g. bad magic, truncated chunk,
    /// malformed VLQ, or a file shorter than its declared type's minimal
    /// header).
    #[error("Malformed container: {0}")]
    BadFile(String),

    /// Magic-byte sniffing could not classify the file as any supported
    /// container type.
    #[error("Unrecognized file type: {0}")]
    BadFileType(String),

    /// A referenced resource ID (RMF resource-map entry, XMF node) is
    /// missing from the container.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("WAV error: {0}")]
    WavError(String),

    #[error("Project error: {0}")]
    ProjectError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Recording error: {0}")]
    RecordingError(String),
}

pub type FileResult<T> = Result<T, FileError>;

impl From<hound::Error> for FileError {
    fn from(err: hound::Error) -> Self {
        FileError::WavError(err.to_string())
    }
}
