//! Download task orchestration: top-level lifecycle for a single download.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::config::RetryPolicyConfig;
use crate::disk::DiskMonitor;
use crate::error::FailureReason;
use crate::playlist::PlaylistResolver;
use crate::progress::{self, ProgressTracker};
use crate::scheduler::{SchedulerParams, SegmentScheduler};
use crate::throttle::RateLimiter;
use crate::types::{
    DownloadBatchResult, DownloadRequest, DownloadResult, Event, SegmentTask, Stage,
};
use crate::utils::validate_playlist_url;

use super::batching::{build_tasks, count_missing, preflight, run_pass};
use super::context::{DownloadPaths, DownloadTaskContext};
use super::finalization::{finalize_download, verify_complete};

/// A merged output file
pub(super) struct Completed {
    pub(super) path: PathBuf,
    pub(super) size: u64,
}

/// Core download task: runs one download to its terminal result.
///
/// Phases:
/// 1. Validate the request and resolve the playlist
/// 2. Preflight disk capacity, create the working directory, fetch keys
/// 3. First pass over every segment
/// 4. Circuit breaker, then batch retry passes over the failures
/// 5. Merge once every segment is present
pub(crate) async fn run_download_task(
    ctx: DownloadTaskContext,
    request: DownloadRequest,
) -> DownloadResult {
    let span = tracing::info_span!("hls_download", video_id = %ctx.video_id);
    async move {
        let started = Instant::now();
        tracing::info!(playlist_url = %request.playlist_url, "Download started");

        match execute(&ctx, &request).await {
            Ok(Completed { path, size }) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    path = %path.display(),
                    size,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Download complete"
                );
                ctx.emit(Event::Complete {
                    video_id: ctx.video_id.clone(),
                    path: path.clone(),
                    size,
                });
                DownloadResult::Success {
                    path,
                    size,
                    elapsed,
                }
            }
            Err(reason) => {
                if reason == FailureReason::Cancelled {
                    tracing::warn!("Download cancelled");
                } else {
                    tracing::error!(reason = %reason, "Download failed");
                }
                ctx.emit(Event::Failed {
                    video_id: ctx.video_id.clone(),
                    reason: reason.clone(),
                });
                DownloadResult::Failed(reason)
            }
        }
    }
    .instrument(span)
    .await
}

async fn execute(
    ctx: &DownloadTaskContext,
    request: &DownloadRequest,
) -> Result<Completed, FailureReason> {
    let config = &ctx.config;

    // Phase 1: validate and resolve
    let url = validate_playlist_url(&request.playlist_url, config.limits.max_url_length)?;
    if request.output.as_os_str().is_empty() {
        return Err(FailureReason::InvalidRequest(
            "output path is empty".to_string(),
        ));
    }
    let paths = DownloadPaths::for_output(&request.output);
    if ctx.cancel_token.is_cancelled() {
        return Err(FailureReason::Cancelled);
    }

    let resolver = PlaylistResolver::new(
        ctx.client.clone(),
        std::sync::Arc::new(config.http.clone()),
        std::sync::Arc::new(config.limits.clone()),
    );
    let descriptor = resolver.resolve(url.as_str()).await?;
    let total = descriptor.len();
    ctx.emit(Event::PlaylistResolved {
        video_id: ctx.video_id.clone(),
        segments: total,
        encrypted: descriptor.is_encrypted(),
    });

    if let Some(previous) = progress::load(&paths.progress).await {
        if previous.total == total {
            tracing::info!(
                downloaded = previous.downloaded,
                total,
                "Resuming previous download"
            );
        } else {
            tracing::warn!(
                previous_total = previous.total,
                total,
                "Playlist changed since the last attempt, resuming from segment files"
            );
        }
    }

    // Phase 2: capacity, working directory, keys
    let missing = count_missing(&descriptor, &paths);
    ctx.emit(Event::Downloading {
        video_id: ctx.video_id.clone(),
        stage: Stage::Preflighting,
        downloaded: total - missing,
        total,
        bytes: 0,
    });
    let segment_estimate = preflight(ctx, &descriptor, &paths, missing).await?;

    tokio::fs::create_dir_all(&paths.work_dir)
        .await
        .map_err(|e| {
            FailureReason::Io(format!(
                "failed to create working directory {}: {e}",
                paths.work_dir.display()
            ))
        })?;

    let tasks = build_tasks(ctx, &descriptor, &paths).await?;

    let disk_monitor = DiskMonitor::new(&paths.work_dir, &config.disk_space, segment_estimate, total);
    let scheduler = SegmentScheduler::new(SchedulerParams {
        client: ctx.client.clone(),
        config: config.scheduler.clone(),
        segment_timeout: config.http.segment_timeout,
        limiter: RateLimiter::new(config.throttle.clone()),
        resolver,
        cancel_token: ctx.cancel_token.clone(),
        disk_monitor: disk_monitor.clone(),
    });
    let mut progress = ProgressTracker::new(
        &paths.progress,
        total,
        config.scheduler.checkpoint_every_segments,
        config.scheduler.checkpoint_interval,
    );

    // Phase 3: first pass
    tracing::info!(total, missing, workers = config.scheduler.workers, "Starting first pass");
    let first = run_pass(
        ctx,
        &scheduler,
        tasks.clone(),
        config.scheduler.workers,
        Stage::FirstPass,
        &mut progress,
    )
    .await;
    check_interrupted(ctx, &disk_monitor, &mut progress, &first).await?;
    check_failure_rate(&mut progress, &first, &config.retry, None).await?;

    // Phase 4: batch retries
    let failed = retry_failed(ctx, &scheduler, &disk_monitor, &tasks, first.failed, &mut progress).await?;
    if !failed.is_empty() {
        progress.checkpoint(total - failed.len()).await;
        tracing::error!(
            missing = failed.len(),
            total,
            first_missing = failed.first().copied(),
            "Segments still missing after every retry pass"
        );
        return Err(FailureReason::IncompleteAfterRetries {
            missing: failed.len(),
            total,
        });
    }

    // Phase 5: merge
    verify_complete(&tasks, &mut progress).await?;
    finalize_download(ctx, &paths, total).await
}

/// Retry failed segments in passes until none are left or the budget runs out;
/// returns the indices still failed
async fn retry_failed(
    ctx: &DownloadTaskContext,
    scheduler: &SegmentScheduler,
    disk_monitor: &DiskMonitor,
    tasks: &[SegmentTask],
    mut failed: Vec<usize>,
    progress: &mut ProgressTracker,
) -> Result<Vec<usize>, FailureReason> {
    if failed.is_empty() {
        return Ok(failed);
    }

    let policy = &ctx.config.retry;
    let workers = policy.retry_workers.min(ctx.config.scheduler.workers);
    let total = progress.total();
    scheduler.limiter().reset();

    for attempt in 0..policy.retry_passes {
        let pass = attempt + 1;
        let wait = pass_wait(policy.pass_wait_step, policy.pass_wait_cap, attempt);
        tracing::warn!(
            pass,
            max_passes = policy.retry_passes,
            remaining = failed.len(),
            wait_ms = wait.as_millis() as u64,
            "Retrying failed segments"
        );
        ctx.emit(Event::RetryPass {
            video_id: ctx.video_id.clone(),
            pass,
            remaining: failed.len(),
        });

        let interrupted = tokio::select! {
            _ = ctx.cancel_token.cancelled() => true,
            _ = tokio::time::sleep(wait) => false,
        };
        if interrupted {
            return Err(cancelled(progress, total - failed.len()).await);
        }

        let retry_tasks: Vec<SegmentTask> = failed
            .iter()
            .filter_map(|&index| tasks.get(index).cloned())
            .collect();
        let result = run_pass(ctx, scheduler, retry_tasks, workers, Stage::BatchRetry, progress).await;
        check_interrupted(ctx, disk_monitor, progress, &result).await?;

        failed = result.failed.clone();
        if failed.is_empty() {
            tracing::info!(pass, "All segments recovered");
            break;
        }
        check_failure_rate(progress, &result, policy, Some(pass)).await?;
    }

    Ok(failed)
}

/// Wait before retry pass `attempt` (zero-based): `min((1 + attempt) * step, cap)`
pub(super) fn pass_wait(step: Duration, cap: Duration, attempt: u32) -> Duration {
    step.saturating_mul(attempt.saturating_add(1)).min(cap)
}

/// Stop after a pass that was cut short by cancellation or a disk shortage
async fn check_interrupted(
    ctx: &DownloadTaskContext,
    disk_monitor: &DiskMonitor,
    progress: &mut ProgressTracker,
    result: &DownloadBatchResult,
) -> Result<(), FailureReason> {
    let downloaded = progress.total() - result.failed.len();
    if ctx.cancel_token.is_cancelled() {
        return Err(cancelled(progress, downloaded).await);
    }
    if let Some(shortage) = disk_monitor.shortage() {
        progress.checkpoint(downloaded).await;
        return Err(shortage.into());
    }
    Ok(())
}

/// Save progress and build the cancellation failure
async fn cancelled(progress: &mut ProgressTracker, downloaded: usize) -> FailureReason {
    tracing::warn!(downloaded, total = progress.total(), "Download interrupted, progress saved");
    progress.checkpoint(downloaded).await;
    FailureReason::Cancelled
}

/// Whether the failures left after a pass open the circuit breaker
///
/// `pass` is `None` for the first pass, which is always checked; retry passes
/// are checked from `min_passes_before_abort` on. The rate is failed segments
/// over every segment of the playlist. Retry passes only shrink the failed
/// set, so a retry pass can only trip when the first pass already sat above
/// the threshold.
pub(super) fn breaker_open(
    policy: &RetryPolicyConfig,
    pass: Option<u32>,
    failed: usize,
    total: usize,
) -> bool {
    if total == 0 || pass.is_some_and(|pass| pass < policy.min_passes_before_abort) {
        return false;
    }
    failed as f64 / total as f64 > policy.max_failure_rate
}

/// Circuit breaker: save progress and abort when [`breaker_open`] says so
async fn check_failure_rate(
    progress: &mut ProgressTracker,
    result: &DownloadBatchResult,
    policy: &RetryPolicyConfig,
    pass: Option<u32>,
) -> Result<(), FailureReason> {
    let total = progress.total();
    let failed = result.failed.len();
    if breaker_open(policy, pass, failed, total) {
        let failure_rate = failed as f64 / total as f64;
        progress.checkpoint(total - failed).await;
        tracing::error!(
            failed,
            total,
            failure_rate,
            pass,
            "Failure rate too high, aborting"
        );
        return Err(FailureReason::HighFailureRate { failed, total });
    }
    Ok(())
}
