//! Download one HLS playlist to a `.ts` file
//!
//! Usage:
//!
//! ```text
//! cargo run --example download_playlist -- <playlist-url> <output> [video-id]
//! ```
//!
//! Set `RUST_LOG=hls_dl=debug` for per-segment detail. Ctrl+C cancels the
//! download; running the same command again resumes it.

use hls_dl::config::{Config, SchedulerConfig};
use hls_dl::{DownloadRequest, DownloadResult, Event, HlsDownloader, run_with_shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hls_dl=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(playlist_url), Some(output)) = (args.next(), args.next()) else {
        eprintln!("usage: download_playlist <playlist-url> <output> [video-id]");
        std::process::exit(2);
    };
    let video_id = args.next().unwrap_or_else(|| "demo".to_string());

    let config = Config {
        scheduler: SchedulerConfig {
            workers: 16,
            ..Default::default()
        },
        ..Default::default()
    };
    let downloader = HlsDownloader::new(config)?;

    // Subscribe to events
    let mut events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::PlaylistResolved {
                    segments,
                    encrypted,
                    ..
                } => {
                    println!("Resolved {segments} segments (encrypted: {encrypted})");
                }
                Event::Downloading {
                    stage,
                    downloaded,
                    total,
                    bytes,
                    ..
                } => {
                    println!(
                        "{stage:?}: {downloaded}/{total} segments, {:.2} MB this pass",
                        bytes as f64 / 1_048_576.0
                    );
                }
                Event::RetryPass {
                    pass, remaining, ..
                } => {
                    println!("Retry pass {pass}: {remaining} segments");
                }
                Event::Merging { segments, .. } => {
                    println!("Merging {segments} segments");
                }
                Event::Complete { path, size, .. } => {
                    println!("Complete: {} ({size} bytes)", path.display());
                }
                Event::Failed { reason, .. } => {
                    println!("Failed: {reason}");
                }
            }
        }
    });

    let request = DownloadRequest::new(playlist_url, output, video_id);
    match run_with_shutdown(downloader, request).await {
        DownloadResult::Success { path, elapsed, .. } => {
            println!("Saved {} in {:.1}s", path.display(), elapsed.as_secs_f64());
            Ok(())
        }
        DownloadResult::Failed(reason) => Err(reason.into()),
    }
}
