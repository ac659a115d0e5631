//! Test configuration helpers for creating test downloaders

use std::time::Duration;
use tempfile::TempDir;
use hls_dl::config::{RetryPolicyConfig, SchedulerConfig};
use hls_dl::{Config, HlsDownloader};

/// Configuration with every wait shrunk to milliseconds
pub fn fast_config() -> Config {
    Config {
        scheduler: SchedulerConfig {
            workers: 8,
            attempt_backoff: Duration::from_millis(1),
            ..Default::default()
        },
        retry: RetryPolicyConfig {
            pass_wait_step: Duration::from_millis(1),
            pass_wait_cap: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Create a downloader with [`fast_config`] and a scratch directory
///
/// Returns the downloader and temp directory (keep temp_dir alive for test duration)
pub fn create_test_downloader() -> (HlsDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let downloader = HlsDownloader::new(fast_config()).expect("valid config");
    (downloader, temp_dir)
}

/// Playlist URL for live tests, from `HLS_DL_LIVE_URL` (a `.env` file works too)
pub fn live_playlist_url() -> Option<String> {
    dotenvy::dotenv().ok();
    std::env::var("HLS_DL_LIVE_URL").ok().filter(|url| !url.is_empty())
}
