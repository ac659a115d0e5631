//! Download finalization: completeness gate, merge and cleanup.

use crate::error::FailureReason;
use crate::merge::merge_segments;
use crate::progress::ProgressTracker;
use crate::types::{Event, SegmentTask};
use crate::utils::nonempty_file_size;

use super::context::{DownloadPaths, DownloadTaskContext};
use super::orchestration::Completed;

/// Refuse to merge unless every segment file is on disk with nonzero size
///
/// The pass results already say so; this re-reads the filesystem because a
/// partial merge is the one outcome that must never happen.
pub(super) async fn verify_complete(
    tasks: &[SegmentTask],
    progress: &mut ProgressTracker,
) -> Result<(), FailureReason> {
    let missing: Vec<usize> = tasks
        .iter()
        .filter(|task| nonempty_file_size(&task.destination).is_none())
        .map(|task| task.index)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let total = tasks.len();
    progress.checkpoint(total - missing.len()).await;
    tracing::error!(
        missing = missing.len(),
        first_missing = missing[0],
        "Segment files disappeared before merge"
    );
    Err(FailureReason::IncompleteAfterRetries {
        missing: missing.len(),
        total,
    })
}

/// Merge the segments into the output, then remove the working directory and
/// progress sidecar.
pub(super) async fn finalize_download(
    ctx: &DownloadTaskContext,
    paths: &DownloadPaths,
    total: usize,
) -> Result<Completed, FailureReason> {
    ctx.emit(Event::Merging {
        video_id: ctx.video_id.clone(),
        segments: total,
    });

    let summary = merge_segments(&paths.work_dir, &paths.output, total)
        .await
        .map_err(|e| FailureReason::Io(e.to_string()))?;

    if let Err(e) = tokio::fs::remove_dir_all(&paths.work_dir).await {
        tracing::warn!(path = %paths.work_dir.display(), error = %e, "Failed to remove working directory");
    }
    match tokio::fs::remove_file(&paths.progress).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %paths.progress.display(), error = %e, "Failed to remove progress file")
        }
    }

    Ok(Completed {
        path: paths.output.clone(),
        size: summary.bytes,
    })
}
