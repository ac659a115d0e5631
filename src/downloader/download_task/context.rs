//! Download task context: shared per-download state and on-disk layout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::types::Event;
use crate::utils::{normalize_output_path, progress_path_for, segment_file_name, working_dir_for};

/// Everything one download needs from its [`HlsDownloader`](crate::HlsDownloader)
pub(crate) struct DownloadTaskContext {
    /// Caller's video identifier, used for log and event correlation
    pub(crate) video_id: String,
    /// Configuration shared with the downloader
    pub(crate) config: Arc<Config>,
    /// Shared HTTP client
    pub(crate) client: reqwest::Client,
    /// Event broadcast sender
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Child of the downloader's token; cancelling it stops this download only
    pub(crate) cancel_token: CancellationToken,
}

impl DownloadTaskContext {
    /// Emit an event; no subscribers is fine
    pub(super) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Where a download keeps its files
#[derive(Debug, Clone)]
pub(super) struct DownloadPaths {
    /// Final merged file (`.ts`)
    pub(super) output: PathBuf,
    /// `<stem>_segments/`
    pub(super) work_dir: PathBuf,
    /// `<stem>.progress.json`
    pub(super) progress: PathBuf,
}

impl DownloadPaths {
    pub(super) fn for_output(output: &Path) -> Self {
        let output = normalize_output_path(output);
        Self {
            work_dir: working_dir_for(&output),
            progress: progress_path_for(&output),
            output,
        }
    }

    /// Destination of segment `index`
    pub(super) fn segment(&self, index: usize) -> PathBuf {
        self.work_dir.join(segment_file_name(index))
    }
}
