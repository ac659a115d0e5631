//! Background progress reporting while a scheduler pass runs.

use crate::scheduler::PassCounters;
use crate::types::{Event, Stage};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Interval between progress update emissions
const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Parameters for spawning a progress reporter background task
pub(crate) struct ProgressReporterParams {
    /// Caller's video identifier
    pub video_id: String,
    /// Stage reported in every event
    pub stage: Stage,
    /// Segments already present before the pass started
    pub baseline: usize,
    /// Total segments in the playlist
    pub total: usize,
    /// Live counters of the pass
    pub counters: PassCounters,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Stops the reporter when the pass ends
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Build a `Downloading` event from the current counters
pub(crate) fn progress_event(
    video_id: &str,
    stage: Stage,
    baseline: usize,
    total: usize,
    counters: &PassCounters,
) -> Event {
    let completed = counters.completed.load(Ordering::Relaxed) as usize;
    Event::Downloading {
        video_id: video_id.to_string(),
        stage,
        downloaded: (baseline + completed).min(total),
        total,
        bytes: counters.bytes.load(Ordering::Relaxed),
    }
}

/// Spawn a task that emits a `Downloading` event every 500ms until cancelled
pub(crate) fn spawn_progress_reporter(
    params: ProgressReporterParams,
) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        video_id,
        stage,
        baseline,
        total,
        counters,
        event_tx,
        cancel_token,
    } = params;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    event_tx
                        .send(progress_event(&video_id, stage, baseline, total, &counters))
                        .ok();
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn reporter_emits_downloading_events_from_counters() {
        let (event_tx, mut event_rx) = tokio::sync::broadcast::channel(16);
        let cancel_token = CancellationToken::new();
        let counters = PassCounters::default();
        counters.completed.store(3, Ordering::Relaxed);
        counters.bytes.store(300, Ordering::Relaxed);

        let handle = spawn_progress_reporter(ProgressReporterParams {
            video_id: "vid".to_string(),
            stage: Stage::BatchRetry,
            baseline: 5,
            total: 10,
            counters,
            event_tx,
            cancel_token: cancel_token.clone(),
        });

        // The first interval tick fires immediately
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        match event {
            Event::Downloading {
                video_id,
                stage,
                downloaded,
                total,
                bytes,
            } => {
                assert_eq!(video_id, "vid");
                assert_eq!(stage, Stage::BatchRetry);
                assert_eq!(downloaded, 8);
                assert_eq!(total, 10);
                assert_eq!(bytes, 300);
            }
            other => panic!("expected Downloading, got {other:?}"),
        }
    }

    #[test]
    fn progress_event_never_exceeds_total() {
        let counters = PassCounters::default();
        counters.completed.store(20, Ordering::Relaxed);

        match progress_event("vid", Stage::FirstPass, 5, 10, &counters) {
            Event::Downloading { downloaded, .. } => assert_eq!(downloaded, 10),
            other => panic!("expected Downloading, got {other:?}"),
        }
    }
}
