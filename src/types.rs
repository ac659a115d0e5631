//! Core types and events

use crate::error::FailureReason;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Encryption method named by an `#EXT-X-KEY` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMethod {
    /// AES-128 in CBC mode over whole segments
    Aes128,
}

/// Encryption metadata for a run of segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKeyRef {
    /// Absolute key URI
    pub uri: String,
    /// Encryption method (only AES-128 is accepted by the resolver)
    pub method: KeyMethod,
    /// Explicit IV from the playlist, as written (hex, optional `0x` prefix)
    pub iv: Option<String>,
}

/// One media segment of a resolved playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Zero-based position in the playlist
    pub index: usize,
    /// Absolute segment URL
    pub uri: String,
    /// Key in effect for this segment, if encrypted
    pub key: Option<EncryptionKeyRef>,
}

/// A resolved media playlist, read-only after resolution
#[derive(Debug, Clone)]
pub struct PlaylistDescriptor {
    /// URL of the media playlist actually used (a variant when the input was a master)
    pub playlist_url: String,
    /// Base URL relative segment and key URIs were resolved against
    pub base_url: String,
    /// Segments in playback order
    pub segments: Vec<SegmentRef>,
    /// `#EXT-X-MEDIA-SEQUENCE` value (0 when absent)
    pub media_sequence_start: u64,
    /// The playlist's encryption key, if any segment is encrypted
    pub encryption: Option<EncryptionKeyRef>,
}

impl PlaylistDescriptor {
    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the playlist has no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any segment needs decryption
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}

/// Key material for one segment
#[derive(Debug, Clone)]
pub struct SegmentCipher {
    /// 16-byte AES key, shared with the key cache
    pub key: Arc<[u8; 16]>,
    /// IV for this segment
    pub iv: [u8; 16],
}

/// Unit of work for the segment scheduler
///
/// Tasks are generated once per download and resubmitted unchanged on every
/// retry pass.
#[derive(Debug, Clone)]
pub struct SegmentTask {
    /// Zero-based segment index
    pub index: usize,
    /// Absolute segment URL
    pub url: String,
    /// Final location of the segment file
    pub destination: PathBuf,
    /// Decryption material, when encrypted
    pub cipher: Option<SegmentCipher>,
    /// Media playlist URL, used to re-resolve expired segment URLs
    pub playlist_url: String,
}

/// Result of one scheduling of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutcome {
    /// Segment index
    pub index: usize,
    /// Whether the segment file is now present
    pub success: bool,
    /// Size of the segment file on success
    pub bytes: u64,
    /// Whether the last HTTP status seen was 403
    pub rate_limited: bool,
    /// Last error message on failure
    pub error: Option<String>,
}

impl SegmentOutcome {
    /// Successful outcome with the given file size
    pub fn success(index: usize, bytes: u64) -> Self {
        Self {
            index,
            success: true,
            bytes,
            rate_limited: false,
            error: None,
        }
    }

    /// Failed outcome
    pub fn failure(index: usize, rate_limited: bool, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            bytes: 0,
            rate_limited,
            error: Some(error.into()),
        }
    }
}

/// Aggregate of one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadBatchResult {
    /// Segments present after the pass
    pub downloaded: usize,
    /// Indices that failed, ascending
    pub failed: Vec<usize>,
    /// Bytes of the successful segments
    pub total_bytes: u64,
}

impl DownloadBatchResult {
    /// Fold per-task outcomes into a batch result
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = SegmentOutcome>) -> Self {
        let mut result = Self::default();
        for outcome in outcomes {
            if outcome.success {
                result.downloaded += 1;
                result.total_bytes += outcome.bytes;
            } else {
                result.failed.push(outcome.index);
            }
        }
        result.failed.sort_unstable();
        result
    }
}

/// A top-level download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// HLS playlist URL (master or media)
    pub playlist_url: String,
    /// Destination file; normalized to a `.ts` extension
    pub output: PathBuf,
    /// Caller's identifier for the video, used for log correlation only
    pub video_id: String,
}

impl DownloadRequest {
    /// Build a request
    pub fn new(
        playlist_url: impl Into<String>,
        output: impl Into<PathBuf>,
        video_id: impl Into<String>,
    ) -> Self {
        Self {
            playlist_url: playlist_url.into(),
            output: output.into(),
            video_id: video_id.into(),
        }
    }
}

/// Terminal value of one [`HlsDownloader::download`](crate::HlsDownloader::download) call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    /// Merged file written
    Success {
        /// Final output path
        path: PathBuf,
        /// Size of the merged file in bytes
        size: u64,
        /// Wall time of the whole call
        elapsed: Duration,
    },
    /// No output file; the working directory is kept for resume
    Failed(FailureReason),
}

impl DownloadResult {
    /// Whether the download produced an output file
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadResult::Success { .. })
    }

    /// The failure reason, if any
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            DownloadResult::Failed(reason) => Some(reason),
            DownloadResult::Success { .. } => None,
        }
    }
}

/// Download lifecycle stage, reported in events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetching and resolving the playlist
    Resolving,
    /// Checking disk capacity
    Preflighting,
    /// First pass over all segments
    FirstPass,
    /// Retrying failed segments
    BatchRetry,
    /// Concatenating segments into the output
    Merging,
}

/// Events emitted by the downloader
///
/// Subscribe via [`HlsDownloader::subscribe`](crate::HlsDownloader::subscribe).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Playlist resolved to a media playlist
    PlaylistResolved {
        /// Caller's video identifier
        video_id: String,
        /// Number of segments
        segments: usize,
        /// Whether segments are encrypted
        encrypted: bool,
    },

    /// Segment progress
    Downloading {
        /// Caller's video identifier
        video_id: String,
        /// Current stage
        stage: Stage,
        /// Segments present so far
        downloaded: usize,
        /// Total segments
        total: usize,
        /// Bytes written in the current pass
        bytes: u64,
    },

    /// A batch retry pass is starting
    RetryPass {
        /// Caller's video identifier
        video_id: String,
        /// 1-based pass number
        pass: u32,
        /// Segments being retried
        remaining: usize,
    },

    /// All segments present, merging
    Merging {
        /// Caller's video identifier
        video_id: String,
        /// Segments being merged
        segments: usize,
    },

    /// Output written
    Complete {
        /// Caller's video identifier
        video_id: String,
        /// Output path
        path: PathBuf,
        /// Output size in bytes
        size: u64,
    },

    /// Download failed
    Failed {
        /// Caller's video identifier
        video_id: String,
        /// Why
        reason: FailureReason,
    },
}
