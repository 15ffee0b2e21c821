//! Error types shared across SegCap crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level error type for SegCap operations.
#[derive(Debug, thiserror::Error)]
pub enum SegcapError {
    #[error("Media access error: {message}")]
    MediaAccess { message: String },

    #[error("No supported MIME type found among {candidates} candidates")]
    NoSupportedFormat { candidates: usize },

    #[error("Encoder initialization failed: {message}")]
    EncoderInit { message: String },

    #[error("Playback error: {message}")]
    Playback { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown segment #{index}")]
    UnknownSegment { index: usize },

    #[error("Segment #{index} is already finalized")]
    SegmentFinalized { index: usize },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SegcapError.
pub type SegcapResult<T> = Result<T, SegcapError>;

/// Coarse classification of an error, as reported to session observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Permission denied, no device, or the acquisition API failed.
    MediaAccess,
    /// None of the encoding candidates is supported.
    NoSupportedFormat,
    /// The platform encoder could not be constructed.
    EncoderInit,
    /// The local preview could not render the stream.
    Playback,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MediaAccess => "media_access",
            ErrorKind::NoSupportedFormat => "no_supported_format",
            ErrorKind::EncoderInit => "encoder_init",
            ErrorKind::Playback => "playback",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl SegcapError {
    pub fn media_access(msg: impl Into<String>) -> Self {
        Self::MediaAccess {
            message: msg.into(),
        }
    }

    pub fn encoder_init(msg: impl Into<String>) -> Self {
        Self::EncoderInit {
            message: msg.into(),
        }
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Classification used when the error is surfaced to observers.
    ///
    /// A denied permission during acquisition is a media access failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MediaAccess { .. } | Self::PermissionDenied { .. } => ErrorKind::MediaAccess,
            Self::NoSupportedFormat { .. } => ErrorKind::NoSupportedFormat,
            Self::EncoderInit { .. } => ErrorKind::EncoderInit,
            Self::Playback { .. } => ErrorKind::Playback,
            _ => ErrorKind::Other,
        }
    }
}
