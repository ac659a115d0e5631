//! Segment scheduler: a bounded pool of segment workers
//!
//! Every task runs as its own tokio task so decryption and file writes get real
//! parallelism; `buffer_unordered` caps how many run at once. Outcomes are
//! consumed in completion order, which is where progress checkpoints and the
//! disk monitor hook in.
//!
//! Submodules:
//! - [`worker`] - the per-segment fetch, decrypt and write pipeline

mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::disk::DiskMonitor;
use crate::playlist::PlaylistResolver;
use crate::progress::ProgressTracker;
use crate::throttle::RateLimiter;
use crate::types::{DownloadBatchResult, SegmentOutcome, SegmentTask};

use worker::{WorkerContext, process_segment};

/// Live counters of one pass, read by the progress reporter
#[derive(Clone, Default)]
pub struct PassCounters {
    /// Segments present (fetched or already on disk)
    pub completed: Arc<AtomicU64>,
    /// Segments that exhausted their attempts
    pub failed: Arc<AtomicU64>,
    /// Bytes of present segments
    pub bytes: Arc<AtomicU64>,
}

/// Parameters for building a [`SegmentScheduler`]
pub struct SchedulerParams {
    /// Shared HTTP client
    pub client: reqwest::Client,
    /// Worker settings
    pub config: SchedulerConfig,
    /// Per-request timeout for segment GETs
    pub segment_timeout: Duration,
    /// Shared 403 throttle
    pub limiter: RateLimiter,
    /// Resolver used to refresh stale segment URLs
    pub resolver: PlaylistResolver,
    /// Download-wide cancellation
    pub cancel_token: CancellationToken,
    /// Mid-download disk check
    pub disk_monitor: DiskMonitor,
}

/// Runs passes of segment tasks through a bounded worker pool
pub struct SegmentScheduler {
    client: reqwest::Client,
    config: Arc<SchedulerConfig>,
    segment_timeout: Duration,
    limiter: RateLimiter,
    resolver: PlaylistResolver,
    cancel_token: CancellationToken,
    disk_monitor: DiskMonitor,
}

impl SegmentScheduler {
    /// Create a scheduler
    pub fn new(params: SchedulerParams) -> Self {
        let SchedulerParams {
            client,
            config,
            segment_timeout,
            limiter,
            resolver,
            cancel_token,
            disk_monitor,
        } = params;
        Self {
            client,
            config: Arc::new(config),
            segment_timeout,
            limiter,
            resolver,
            cancel_token,
            disk_monitor,
        }
    }

    /// The throttle shared by this scheduler's workers
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run one pass over `tasks` with at most `workers` in flight
    ///
    /// A pass stops early when the download is cancelled or the disk monitor
    /// reports a shortage; tasks that never ran are reported as failed.
    pub async fn run(
        &self,
        tasks: Vec<SegmentTask>,
        workers: usize,
        counters: &PassCounters,
        progress: &mut ProgressTracker,
    ) -> DownloadBatchResult {
        let pass_token = self.cancel_token.child_token();
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            segment_timeout: self.segment_timeout,
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            cancel_token: pass_token.clone(),
        });

        let baseline = progress.total().saturating_sub(tasks.len());
        let mut completed = 0usize;
        let mut outcomes = Vec::with_capacity(tasks.len());

        let mut pending = stream::iter(tasks)
            .map(|task| {
                let ctx = Arc::clone(&ctx);
                let index = task.index;
                async move {
                    match tokio::spawn(process_segment(ctx, task)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(segment = index, error = %e, "Segment worker panicked");
                            SegmentOutcome::failure(index, false, format!("worker failed: {e}"))
                        }
                    }
                }
            })
            .buffer_unordered(workers.max(1));

        while let Some(outcome) = pending.next().await {
            if outcome.success {
                completed += 1;
                counters.completed.fetch_add(1, Ordering::Relaxed);
                counters.bytes.fetch_add(outcome.bytes, Ordering::Relaxed);
                progress.record(baseline + completed).await;

                if !self.disk_monitor.record_segment() && !pass_token.is_cancelled() {
                    tracing::error!("Stopping pass: disk space ran low");
                    pass_token.cancel();
                }
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            outcomes.push(outcome);
        }

        DownloadBatchResult::from_outcomes(outcomes)
    }
}
