//! # hls-dl
//!
//! Concurrent, resumable HLS downloader with inline AES-128 decryption.
//!
//! ## Design Philosophy
//!
//! hls-dl is designed to be:
//! - **Resumable** - Segment files on disk are the source of truth; a failed
//!   download picks up where it stopped
//! - **All or nothing** - An output file is only written when every segment is present
//! - **Polite under pressure** - A shared throttle slows every worker down when
//!   the origin starts answering 403
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use hls_dl::{Config, DownloadRequest, DownloadResult, HlsDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = HlsDownloader::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = DownloadRequest::new(
//!         "https://cdn.example.com/video/master.m3u8",
//!         "downloads/video.ts",
//!         "video-123",
//!     );
//!     match downloader.download(request).await {
//!         DownloadResult::Success { path, size, .. } => println!("{size} bytes in {path:?}"),
//!         DownloadResult::Failed(reason) => eprintln!("failed: {reason}"),
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// AES-128-CBC segment decryption
pub mod decrypt;
/// Disk space preflight and monitoring
pub mod disk;
/// Download orchestration (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// HTTP client construction and fetch helpers
pub mod http;
/// Decryption key cache
pub mod keys;
/// Segment concatenation
pub mod merge;
/// Playlist fetching and resolution
pub mod playlist;
/// Resume progress sidecar
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Bounded-concurrency segment worker pool
pub mod scheduler;
/// Adaptive 403 throttle
pub mod throttle;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use downloader::HlsDownloader;
pub use error::{Error, FailureReason, Result};
pub use types::{DownloadRequest, DownloadResult, Event, Stage};

/// Run one download, cancelling it cooperatively on a termination signal.
///
/// The download runs until it finishes or a signal arrives. On a signal the
/// downloader is cancelled and the download is awaited to its terminal result,
/// which is [`FailureReason::Cancelled`] with progress saved for resume.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use hls_dl::{Config, DownloadRequest, HlsDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = HlsDownloader::new(Config::default())?;
///     let request = DownloadRequest::new(
///         "https://cdn.example.com/video/index.m3u8",
///         "video.ts",
///         "video",
///     );
///
///     // Run with automatic signal handling
///     let result = run_with_shutdown(downloader, request).await;
///     println!("{result:?}");
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    downloader: HlsDownloader,
    request: DownloadRequest,
) -> DownloadResult {
    let download = downloader.download(request);
    tokio::pin!(download);

    tokio::select! {
        result = &mut download => result,
        _ = wait_for_signal() => {
            downloader.cancel();
            download.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal handlers may fail to register in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                wait_for_ctrl_c().await;
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                wait_for_ctrl_c().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

/// Resolves on Ctrl+C; never resolves if Ctrl+C cannot be observed
async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
