//! Preflight, task preparation and pass execution.

use crate::decrypt::{derive_iv, parse_iv};
use crate::disk::{has_capacity, nearest_existing};
use crate::error::FailureReason;
use crate::http::probe_content_length;
use crate::keys::KeyCache;
use crate::progress::ProgressTracker;
use crate::scheduler::{PassCounters, SegmentScheduler};
use crate::types::{DownloadBatchResult, PlaylistDescriptor, SegmentCipher, SegmentTask, Stage};
use crate::utils::nonempty_file_size;

use super::super::background_tasks::{ProgressReporterParams, progress_event, spawn_progress_reporter};
use super::context::{DownloadPaths, DownloadTaskContext};

/// Number of segments without a usable file in the working directory
pub(super) fn count_missing(descriptor: &PlaylistDescriptor, paths: &DownloadPaths) -> usize {
    descriptor
        .segments
        .iter()
        .filter(|segment| nonempty_file_size(&paths.segment(segment.index)).is_none())
        .count()
}

/// Check that the missing segments fit on disk; returns the per-segment size estimate
///
/// The estimate is the first segment's `Content-Length` from a HEAD probe, or
/// the configured fallback when the origin does not say.
pub(super) async fn preflight(
    ctx: &DownloadTaskContext,
    descriptor: &PlaylistDescriptor,
    paths: &DownloadPaths,
    missing: usize,
) -> Result<u64, FailureReason> {
    let disk = &ctx.config.disk_space;
    if !disk.enabled || missing == 0 {
        return Ok(disk.fallback_segment_size);
    }

    let probed = match descriptor.segments.first() {
        Some(first) => {
            probe_content_length(&ctx.client, &first.uri, ctx.config.http.segment_timeout).await
        }
        None => None,
    };
    let estimate = probed.unwrap_or(disk.fallback_segment_size);
    let required = (missing as u64).saturating_mul(estimate);

    let capacity = has_capacity(
        required,
        &nearest_existing(&paths.work_dir),
        disk.size_multiplier,
    );
    tracing::info!(
        missing,
        segment_estimate = estimate,
        probed = probed.is_some(),
        required = capacity.required_with_buffer,
        free_bytes = capacity.free_bytes,
        "Disk space preflight"
    );
    capacity.into_result()?;
    Ok(estimate)
}

/// Build one task per segment, fetching decryption keys up front
///
/// A key that cannot be fetched fails the whole download: none of its
/// segments could be decrypted anyway.
pub(super) async fn build_tasks(
    ctx: &DownloadTaskContext,
    descriptor: &PlaylistDescriptor,
    paths: &DownloadPaths,
) -> Result<Vec<SegmentTask>, FailureReason> {
    let keys = KeyCache::new(
        ctx.client.clone(),
        descriptor.base_url.clone(),
        ctx.config.http.key_timeout,
        ctx.config.keys.clone(),
    );

    let mut tasks = Vec::with_capacity(descriptor.len());
    for segment in &descriptor.segments {
        let cipher = match &segment.key {
            Some(key_ref) => {
                let key = keys.get_key(&key_ref.uri).await?;
                let iv = match &key_ref.iv {
                    Some(raw) => parse_iv(raw).map_err(|e| {
                        FailureReason::PlaylistError(format!("segment {}: {e}", segment.index))
                    })?,
                    None => derive_iv(descriptor.media_sequence_start, segment.index),
                };
                Some(SegmentCipher { key, iv })
            }
            None => None,
        };

        tasks.push(SegmentTask {
            index: segment.index,
            url: segment.uri.clone(),
            destination: paths.segment(segment.index),
            cipher,
            playlist_url: descriptor.playlist_url.clone(),
        });
    }

    if descriptor.is_encrypted() {
        tracing::info!(keys = keys.len().await, "Decryption keys ready");
    }
    Ok(tasks)
}

/// Run one scheduler pass with a progress reporter alongside
pub(super) async fn run_pass(
    ctx: &DownloadTaskContext,
    scheduler: &SegmentScheduler,
    tasks: Vec<SegmentTask>,
    workers: usize,
    stage: Stage,
    progress: &mut ProgressTracker,
) -> DownloadBatchResult {
    let total = progress.total();
    let attempted = tasks.len();
    let baseline = total.saturating_sub(attempted);
    let counters = PassCounters::default();

    let reporter_token = ctx.cancel_token.child_token();
    let reporter = spawn_progress_reporter(ProgressReporterParams {
        video_id: ctx.video_id.clone(),
        stage,
        baseline,
        total,
        counters: counters.clone(),
        event_tx: ctx.event_tx.clone(),
        cancel_token: reporter_token.clone(),
    });

    let result = scheduler.run(tasks, workers, &counters, progress).await;

    reporter_token.cancel();
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "Progress reporter failed");
    }
    ctx.emit(progress_event(&ctx.video_id, stage, baseline, total, &counters));

    tracing::info!(
        stage = ?stage,
        attempted,
        workers,
        downloaded = result.downloaded,
        failed = result.failed.len(),
        bytes = result.total_bytes,
        "Pass finished"
    );
    result
}
