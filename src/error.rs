use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};
use thiserror::Error;
use std::io;

/// Axis of the bubble lattice that failed to line up with the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GridAxis {
    Rows,
    Columns,
}

#[derive(Error, Debug)]
pub enum OmrError {
    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Dimension Error: image is {width}x{height}, allowed range is {min}..={max} per side")]
    Dimension {
        width: u32,
        height: u32,
        min: u32,
        max: u32,
    },

    #[error("Unsupported Format: {0}")]
    UnsupportedFormat(String),

    #[error("File Too Large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Grid Mismatch: expected {expected} {axis}, detected {detected}")]
    GridMismatch {
        axis: GridAxis,
        expected: usize,
        detected: usize,
    },

    #[error("Unknown Version: no answer key registered for '{0}'")]
    UnknownVersion(String),

    #[error("Key Validation Error: {0}")]
    KeyValidation(String),

    #[error("Timeout: processing took {elapsed:.3}s, limit is {limit:.3}s")]
    Timeout { elapsed: f64, limit: f64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

/// Flat classification carried in results handed to callers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    Dimension,
    UnsupportedFormat,
    FileTooLarge,
    GridMismatch,
    UnknownVersion,
    KeyValidation,
    Timeout,
    Cancelled,
    Io,
    Json,
    Config,
    Internal,
}

impl OmrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OmrError::Decode(_) => ErrorKind::Decode,
            OmrError::Dimension { .. } => ErrorKind::Dimension,
            OmrError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            OmrError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            OmrError::GridMismatch { .. } => ErrorKind::GridMismatch,
            OmrError::UnknownVersion(_) => ErrorKind::UnknownVersion,
            OmrError::KeyValidation(_) => ErrorKind::KeyValidation,
            OmrError::Timeout { .. } => ErrorKind::Timeout,
            OmrError::Cancelled => ErrorKind::Cancelled,
            OmrError::Io(_) => ErrorKind::Io,
            OmrError::Json(_) => ErrorKind::Json,
            OmrError::Config(_) => ErrorKind::Config,
            OmrError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only failures that can succeed on a second attempt with the same input.
    pub fn is_transient(&self) -> bool {
        match self {
            OmrError::Timeout { .. } => true,
            OmrError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type OmrResult<T> = Result<T, OmrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_and_passing_io_faults_are_transient() {
        assert!(OmrError::Timeout { elapsed: 2.0, limit: 1.0 }.is_transient());
        assert!(OmrError::Io(io::Error::from(io::ErrorKind::Interrupted)).is_transient());
        assert!(OmrError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_transient());
        assert!(!OmrError::Io(io::Error::from(io::ErrorKind::NotFound)).is_transient());
        assert!(!OmrError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_transient());
        assert!(!OmrError::Io(io::Error::other("disk")).is_transient());
        assert!(!OmrError::Decode("bad".into()).is_transient());
        assert!(!OmrError::UnknownVersion("v9".into()).is_transient());
        assert!(!OmrError::GridMismatch {
            axis: GridAxis::Rows,
            expected: 20,
            detected: 12
        }
        .is_transient());
    }

    #[test]
    fn test_kind_names_are_snake_case() {
        assert_eq!(ErrorKind::GridMismatch.to_string(), "grid_mismatch");
        assert_eq!(
            "unknown_version".parse::<ErrorKind>().ok(),
            Some(ErrorKind::UnknownVersion)
        );
    }
}
