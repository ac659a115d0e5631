//! Custom test assertions for download tests

use hls_dl::{DownloadResult, Event};
use std::path::Path;
use tokio::sync::broadcast::Receiver;

/// Drain every event already buffered in `events`
pub fn drain_events(events: &mut Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

/// Short name of an event, for order assertions
pub fn event_kind(event: &Event) -> &'static str {
    match event {
        Event::PlaylistResolved { .. } => "playlist_resolved",
        Event::Downloading { .. } => "downloading",
        Event::RetryPass { .. } => "retry_pass",
        Event::Merging { .. } => "merging",
        Event::Complete { .. } => "complete",
        Event::Failed { .. } => "failed",
    }
}

/// Assert a successful result whose file holds exactly `expected`
pub fn assert_merged(result: &DownloadResult, expected: &[u8]) {
    match result {
        DownloadResult::Success { path, size, .. } => {
            let written = std::fs::read(path).expect("merged output readable");
            assert_eq!(*size, expected.len() as u64, "reported size");
            assert_eq!(written.len(), expected.len(), "output length");
            assert!(written == expected, "output bytes differ from the segment concatenation");
        }
        DownloadResult::Failed(reason) => panic!("expected success, download failed: {reason}"),
    }
}

/// Assert that neither the working directory nor the sidecar of `output_stem` is left in `dir`
pub fn assert_no_leftovers(dir: &Path, output_stem: &str) {
    let work_dir = dir.join(format!("{output_stem}_segments"));
    let sidecar = dir.join(format!("{output_stem}.progress.json"));
    assert!(!work_dir.exists(), "working directory {work_dir:?} still exists");
    assert!(!sidecar.exists(), "progress file {sidecar:?} still exists");
}
