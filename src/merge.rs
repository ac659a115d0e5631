//! Segment concatenation
//!
//! Transport stream segments are joined byte for byte; the container resyncs on
//! its own packet framing, so no remuxing happens here. The output is written to
//! a temp path and renamed into place so a failed merge leaves no output file.

use crate::error::MergeError;
use crate::utils::parse_segment_index;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// What a merge wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    /// Segment files concatenated
    pub segments: usize,
    /// Zero-length segment files left out
    pub skipped_empty: usize,
    /// Files past the playlist's last segment, left out
    pub ignored_stale: usize,
    /// Size of the output file
    pub bytes: u64,
}

/// Segment files in `dir`, sorted by index
pub async fn list_segments(dir: &Path) -> Result<Vec<(usize, PathBuf)>, MergeError> {
    let wrap = |source| MergeError {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(wrap)?;
    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(wrap)? {
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_segment_index) {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_unstable_by_key(|(index, _)| *index);
    Ok(segments)
}

/// Concatenate segments `0..expected` from `dir` into `output`, in index order
///
/// Files with an index at or past `expected` belong to an earlier, longer
/// playlist and are left out.
pub async fn merge_segments(
    dir: &Path,
    output: &Path,
    expected: usize,
) -> Result<MergeSummary, MergeError> {
    let mut segments = list_segments(dir).await?;
    let listed = segments.len();
    segments.retain(|(index, _)| *index < expected);
    let ignored_stale = listed - segments.len();

    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = output.with_file_name(format!(".{file_name}.merging"));

    let result = write_concatenated(&segments, &tmp).await;
    let summary = match result {
        Ok(summary) => MergeSummary {
            ignored_stale,
            ..summary
        },
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };

    if let Err(source) = tokio::fs::rename(&tmp, output).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(MergeError {
            path: output.to_path_buf(),
            source,
        });
    }

    if summary.skipped_empty > 0 {
        tracing::warn!(
            skipped = summary.skipped_empty,
            "Skipped zero-length segment files during merge"
        );
    }
    if summary.ignored_stale > 0 {
        tracing::warn!(
            ignored = summary.ignored_stale,
            expected,
            "Ignored segment files beyond the playlist's last segment"
        );
    }
    tracing::info!(
        segments = summary.segments,
        bytes = summary.bytes,
        output = %output.display(),
        "Segments merged"
    );

    Ok(summary)
}

async fn write_concatenated(
    segments: &[(usize, PathBuf)],
    tmp: &Path,
) -> Result<MergeSummary, MergeError> {
    let out_err = |source| MergeError {
        path: tmp.to_path_buf(),
        source,
    };

    let file = tokio::fs::File::create(tmp).await.map_err(out_err)?;
    let mut writer = tokio::io::BufWriter::new(file);
    let mut summary = MergeSummary {
        segments: 0,
        skipped_empty: 0,
        ignored_stale: 0,
        bytes: 0,
    };

    for (_, path) in segments {
        let seg_err = |source| MergeError {
            path: path.clone(),
            source,
        };
        let mut segment = tokio::fs::File::open(path).await.map_err(seg_err)?;
        let len = segment.metadata().await.map_err(seg_err)?.len();
        if len == 0 {
            summary.skipped_empty += 1;
            continue;
        }
        summary.bytes += tokio::io::copy(&mut segment, &mut writer)
            .await
            .map_err(seg_err)?;
        summary.segments += 1;
    }

    writer.flush().await.map_err(out_err)?;
    writer.get_ref().sync_all().await.map_err(out_err)?;
    Ok(summary)
}
