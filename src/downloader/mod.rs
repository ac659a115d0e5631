//! Download orchestrator split into focused submodules.
//!
//! The `HlsDownloader` handle owns what is shared between downloads (the
//! configuration, the HTTP client, the event channel and the shutdown token).
//! Each call to [`HlsDownloader::download`] runs one download to a terminal
//! [`DownloadResult`]:
//! - [`download_task`] - the per-download state machine
//! - [`background_tasks`] - progress reporting while a pass runs

mod background_tasks;
mod download_task;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::http::build_client;
use crate::types::{DownloadRequest, DownloadResult, Event};
use crate::utils::{normalize_output_path, progress_path_for, working_dir_for};

use download_task::{DownloadTaskContext, run_download_task};

/// Capacity of the event broadcast channel; slow subscribers lag past this
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Main downloader instance (cloneable - all fields are cheap to clone)
#[derive(Clone)]
pub struct HlsDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// HTTP client shared by playlist, key and segment requests
    pub(crate) client: reqwest::Client,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Parent of every download's cancellation token
    pub(crate) cancel_token: CancellationToken,
}

impl HlsDownloader {
    /// Create a downloader from a validated configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hls_dl::{HlsDownloader, Config};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let downloader = HlsDownloader::new(Config::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config.http)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            client,
            event_tx,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Subscribe to download events
    ///
    /// Returns a receiver that gets every event emitted after the call. Each
    /// subscriber has its own buffer, so a slow subscriber only lags itself.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hls_dl::{HlsDownloader, Config, Event};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let downloader = HlsDownloader::new(Config::default())?;
    /// let mut events = downloader.subscribe();
    ///
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         if let Event::RetryPass { pass, remaining, .. } = event {
    ///             println!("retry pass {pass}: {remaining} segments");
    ///         }
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Download one playlist into `request.output`
    ///
    /// Never panics and never returns an `Err`: every way a download can end
    /// is a [`DownloadResult`]. On failure the working directory and progress
    /// sidecar are kept, so calling again with the same output resumes.
    pub async fn download(&self, request: DownloadRequest) -> DownloadResult {
        let ctx = DownloadTaskContext {
            video_id: request.video_id.clone(),
            config: Arc::clone(&self.config),
            client: self.client.clone(),
            event_tx: self.event_tx.clone(),
            cancel_token: self.cancel_token.child_token(),
        };
        run_download_task(ctx, request).await
    }

    /// Cancel every running and future download of this downloader
    ///
    /// Running downloads save their progress and return
    /// [`FailureReason::Cancelled`](crate::FailureReason::Cancelled).
    pub fn cancel(&self) {
        tracing::info!("Cancelling downloads");
        self.cancel_token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Remove the working directory and progress sidecar kept for `output`
    ///
    /// Use this to give up on a failed download instead of resuming it.
    /// Missing files are not an error.
    pub async fn cleanup(&self, output: &Path) -> Result<()> {
        let output = normalize_output_path(output);
        let work_dir = working_dir_for(&output);
        let progress_path = progress_path_for(&output);

        match tokio::fs::remove_dir_all(&work_dir).await {
            Ok(()) => tracing::info!(path = %work_dir.display(), "Removed working directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(&progress_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
