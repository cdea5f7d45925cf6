//! Error types for the USDZ engine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for export, import and codec operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Destination directory is missing or not writable
    #[error("Destination not writable: {0}")]
    DestinationNotWritable(PathBuf),

    /// Malformed binary or archive data, tagged with the offending section
    #[error("Invalid {section}: {detail}")]
    Format { section: String, detail: String },

    /// Text layer syntax error
    #[error("Parse error at {line}:{column}: {message}")]
    Parse { line: usize, column: usize, message: String },

    /// The archive's first entry is not a scene description layer
    #[error("Invalid default layer: {0}")]
    InvalidLayer(String),

    /// A relationship, connection or reference points at a missing object
    #[error("Dangling reference from {from} to {to}")]
    DanglingReference { from: String, to: String },

    /// Invalid scene path syntax or hierarchy violation
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Time samples out of order or duplicated
    #[error("Invalid time samples on {path}: {detail}")]
    TimeSamples { path: String, detail: String },

    /// Type mismatch when reading a value
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Option value that cannot be clamped into range
    #[error("Invalid option {name}: {detail}")]
    InvalidOption { name: &'static str, detail: String },

    /// Requested functionality is not provided by this engine
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Job was cancelled between stages
    #[error("Operation cancelled")]
    Cancelled,

    /// Image encode/decode failure
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON scene or options document error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Invalid data structure in the in-memory model
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),
}

impl Error {
    /// Create a format error for a named section.
    pub fn format(section: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Format {
            section: section.into(),
            detail: detail.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Whether this error belongs to the format class (malformed input data).
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Format { .. }
                | Self::Parse { .. }
                | Self::InvalidLayer(_)
                | Self::DanglingReference { .. }
                | Self::TimeSamples { .. }
                | Self::InvalidPath(_)
        )
    }
}

/// Result type alias for USDZ operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::format("PATHS", "jump out of range");
        assert!(e.to_string().contains("PATHS"));
        assert!(e.is_format_error());

        let e = Error::Parse { line: 3, column: 7, message: "expected '='".into() };
        assert_eq!(e.to_string(), "Parse error at 3:7: expected '='");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_format_error());
    }
}
