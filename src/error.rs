//! Error types for hls-dl
//!
//! This module provides error handling for the library:
//! - [`Error`], the crate-wide error returned by individual operations
//! - [`FailureReason`], the terminal reason carried by a failed
//!   [`DownloadResult`](crate::types::DownloadResult)
//!
//! Operations inside the pipeline return [`Result`]. The orchestrator turns the
//! fatal ones into a [`FailureReason`] so callers can decide whether to refresh
//! their playlist source, wait, or give up.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hls-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hls-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers")
        key: Option<String>,
    },

    /// The download request itself is unusable (bad URL, bad output path)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Playlist could not be fetched, parsed or resolved to a media playlist
    #[error("playlist error: {0}")]
    Playlist(String),

    /// Decryption key could not be fetched or failed validation
    #[error("key fetch failed for {uri}: {reason}")]
    KeyFetch {
        /// Absolute key URI
        uri: String,
        /// Why the key is unusable
        reason: String,
        /// Whether another attempt could succeed (network trouble vs bad payload)
        retryable: bool,
    },

    /// Segment decryption failed (bad key/IV length, misaligned ciphertext)
    #[error("decryption error: {0}")]
    Decryption(String),

    /// HTTP request returned a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Status code returned by the origin
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Segment response body was empty
    #[error("empty response body for {0}")]
    EmptyBody(String),

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required (buffer included)
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL could not be parsed or joined
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The download was cancelled (interrupt or shutdown)
    #[error("download cancelled")]
    Cancelled,

    /// Background task panicked or was aborted
    #[error("task join error: {0}")]
    Join(String),
}

impl Error {
    /// Whether this error is an HTTP 403, which feeds the adaptive throttle
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::HttpStatus { status: 403, .. })
    }

    /// Last HTTP status carried by this error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Why a top-level download did not produce an output file
///
/// Each variant is a distinct outcome so the caller can react differently:
/// `HighFailureRate` usually means the playlist URL's session expired and the
/// producer should refresh it, `DiskSpaceInsufficient` needs operator action,
/// and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// More than the configured share of segments failed in a pass
    #[error("{failed} of {total} segments failed, origin looks systemically broken")]
    HighFailureRate {
        /// Segments still failed after the pass
        failed: usize,
        /// Total segments in the playlist
        total: usize,
    },

    /// Some segments never succeeded despite the full retry budget
    #[error("{missing} of {total} segments still missing after retries")]
    IncompleteAfterRetries {
        /// Segments still missing
        missing: usize,
        /// Total segments in the playlist
        total: usize,
    },

    /// Playlist fetch/parse/variant selection failed
    #[error("playlist error: {0}")]
    PlaylistError(String),

    /// Preflight or mid-download capacity check failed
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    DiskSpaceInsufficient {
        /// Bytes required (buffer included)
        required: u64,
        /// Bytes available
        available: u64,
    },

    /// Key fetch exhausted its attempts or returned an invalid key
    #[error("key fetch failed: {0}")]
    KeyFetchFailed(String),

    /// Interrupted before completion; working directory kept for resume
    #[error("download cancelled")]
    Cancelled,

    /// Request rejected before any work was done
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Local filesystem failure (working directory, merge)
    #[error("I/O failure: {0}")]
    Io(String),
}

impl From<Error> for FailureReason {
    fn from(err: Error) -> Self {
        match err {
            Error::Playlist(msg) => FailureReason::PlaylistError(msg),
            Error::KeyFetch { uri, reason, .. } => {
                FailureReason::KeyFetchFailed(format!("{uri}: {reason}"))
            }
            Error::InsufficientSpace {
                required,
                available,
            } => FailureReason::DiskSpaceInsufficient {
                required,
                available,
            },
            Error::InvalidRequest(msg) => FailureReason::InvalidRequest(msg),
            Error::Config { message, .. } => FailureReason::InvalidRequest(message),
            Error::Cancelled => FailureReason::Cancelled,
            Error::Io(e) => FailureReason::Io(e.to_string()),
            other => FailureReason::Io(other.to_string()),
        }
    }
}

/// Merge-stage errors carry the file that broke, so they get their own variant
#[derive(Debug, Error)]
#[error("failed to merge segment {}: {source}", .path.display())]
pub struct MergeError {
    /// Segment or output file being processed
    pub path: PathBuf,
    /// Underlying I/O error
    #[source]
    pub source: std::io::Error,
}

impl From<MergeError> for Error {
    fn from(err: MergeError) -> Self {
        Error::Io(std::io::Error::new(err.source.kind(), err.to_string()))
    }
}
