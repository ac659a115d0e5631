//! Resume progress sidecar
//!
//! The sidecar is advisory. On resume the segment files themselves decide what
//! is left to fetch; the sidecar only lets callers and logs see how far a
//! previous run got. Format: `{"downloaded": 12, "total": 50, "timestamp": 1718000000.25}`.

use crate::error::Result;
use crate::utils::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Persisted progress of one download
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Segments present on disk
    pub downloaded: usize,
    /// Segments in the playlist
    pub total: usize,
    /// Unix time of the save, fractional seconds
    pub timestamp: f64,
}

impl ProgressState {
    /// Snapshot at the current time; `downloaded` is clamped to `total`
    pub fn now(downloaded: usize, total: usize) -> Self {
        let now = chrono::Utc::now();
        Self {
            downloaded: downloaded.min(total),
            total,
            timestamp: now.timestamp_millis() as f64 / 1000.0,
        }
    }
}

/// Read a sidecar; missing or unreadable files yield `None`
pub async fn load(path: &Path) -> Option<ProgressState> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice::<ProgressState>(&bytes) {
        Ok(state) if state.downloaded <= state.total => Some(state),
        Ok(state) => {
            tracing::warn!(
                path = %path.display(),
                downloaded = state.downloaded,
                total = state.total,
                "Ignoring inconsistent progress file"
            );
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt progress file");
            None
        }
    }
}

/// Write a sidecar atomically
pub async fn save(path: &Path, state: &ProgressState) -> Result<()> {
    let json = serde_json::to_vec(state)?;
    write_atomic(path, &json).await?;
    Ok(())
}

/// Saves progress every N completed segments or every T, whichever comes first
pub struct ProgressTracker {
    path: PathBuf,
    total: usize,
    every_segments: usize,
    interval: Duration,
    since_save: usize,
    last_save: Instant,
}

impl ProgressTracker {
    /// Create a tracker for a download of `total` segments
    pub fn new(path: impl Into<PathBuf>, total: usize, every_segments: usize, interval: Duration) -> Self {
        Self {
            path: path.into(),
            total,
            every_segments,
            interval,
            since_save: 0,
            last_save: Instant::now(),
        }
    }

    /// Note one completed segment; saves when a checkpoint is due
    ///
    /// Save failures are logged and swallowed: the sidecar is advisory.
    pub async fn record(&mut self, downloaded: usize) -> bool {
        self.since_save += 1;
        let due = (self.every_segments > 0 && self.since_save >= self.every_segments)
            || self.last_save.elapsed() >= self.interval;
        if due {
            self.checkpoint(downloaded).await;
        }
        due
    }

    /// Save now
    pub async fn checkpoint(&mut self, downloaded: usize) {
        let state = ProgressState::now(downloaded, self.total);
        match save(&self.path, &state).await {
            Ok(()) => tracing::debug!(
                downloaded = state.downloaded,
                total = state.total,
                "Progress saved"
            ),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to save progress"),
        }
        self.since_save = 0;
        self.last_save = Instant::now();
    }

    /// Segments in the download
    pub fn total(&self) -> usize {
        self.total
    }

    /// Sidecar location
    pub fn path(&self) -> &Path {
        &self.path
    }
}
