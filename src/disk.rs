//! Disk space guard: capacity preflight and mid-download monitoring
//!
//! Capacity checks fail open. If the OS query errors, the check reports
//! capacity OK and a real shortage surfaces later as a failed segment write.

use crate::config::DiskSpaceConfig;
use crate::error::{Error, Result};
use crate::utils::get_available_space;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Result of a capacity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Whether the write may proceed
    pub ok: bool,
    /// Free bytes reported by the OS (`u64::MAX` when the query failed)
    pub free_bytes: u64,
    /// Requested bytes with the safety buffer applied
    pub required_with_buffer: u64,
}

impl Capacity {
    /// Turn a failed check into [`Error::InsufficientSpace`]
    pub fn into_result(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(Error::InsufficientSpace {
                required: self.required_with_buffer,
                available: self.free_bytes,
            })
        }
    }
}

/// Check whether `path` has room for `required_bytes` times `multiplier`
pub fn has_capacity(required_bytes: u64, path: &Path, multiplier: f64) -> Capacity {
    let required_with_buffer = (required_bytes as f64 * multiplier).ceil() as u64;

    match get_available_space(path) {
        Ok(free_bytes) => Capacity {
            ok: free_bytes >= required_with_buffer,
            free_bytes,
            required_with_buffer,
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Disk space query failed, assuming enough space"
            );
            Capacity {
                ok: true,
                free_bytes: u64::MAX,
                required_with_buffer,
            }
        }
    }
}

/// Nearest existing ancestor of `path` (itself if it exists), for checks made
/// before the working directory is created
pub fn nearest_existing(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return PathBuf::from("."),
        }
    }
}

/// Periodic capacity check driven by segment completions
///
/// The scheduler calls [`DiskMonitor::record_segment`] after every successful
/// write. Every `every` segments the monitor re-checks that the remaining
/// segments still fit and raises the shared shortage flag if not.
#[derive(Clone)]
pub struct DiskMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    dir: PathBuf,
    every: usize,
    multiplier: f64,
    segment_estimate: u64,
    total_segments: usize,
    completed: AtomicU64,
    shortage: AtomicBool,
    shortage_required: AtomicU64,
    shortage_available: AtomicU64,
}

impl DiskMonitor {
    /// Create a monitor for a working directory
    pub fn new(
        dir: impl Into<PathBuf>,
        config: &DiskSpaceConfig,
        segment_estimate: u64,
        total_segments: usize,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                dir: dir.into(),
                every: if config.enabled {
                    config.monitor_every_segments
                } else {
                    0
                },
                multiplier: config.size_multiplier,
                segment_estimate,
                total_segments,
                completed: AtomicU64::new(0),
                shortage: AtomicBool::new(false),
                shortage_required: AtomicU64::new(0),
                shortage_available: AtomicU64::new(0),
            }),
        }
    }

    /// Record one present segment; returns `false` once a shortage was detected
    pub fn record_segment(&self) -> bool {
        let completed = self.inner.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.inner.every > 0 && completed % self.inner.every as u64 == 0 {
            self.check(completed as usize);
        }
        !self.is_short()
    }

    /// Whether a check has found too little space
    pub fn is_short(&self) -> bool {
        self.inner.shortage.load(Ordering::Acquire)
    }

    /// The shortage as an error, if one was detected
    pub fn shortage(&self) -> Option<Error> {
        self.is_short().then(|| Error::InsufficientSpace {
            required: self.inner.shortage_required.load(Ordering::Relaxed),
            available: self.inner.shortage_available.load(Ordering::Relaxed),
        })
    }

    fn check(&self, completed: usize) {
        let remaining = self.inner.total_segments.saturating_sub(completed) as u64;
        if remaining == 0 {
            return;
        }
        let required = remaining.saturating_mul(self.inner.segment_estimate);
        let capacity = has_capacity(
            required,
            &nearest_existing(&self.inner.dir),
            self.inner.multiplier,
        );
        tracing::debug!(
            completed,
            remaining,
            free_bytes = capacity.free_bytes,
            required = capacity.required_with_buffer,
            "Mid-download disk space check"
        );
        if !capacity.ok {
            tracing::error!(
                free_bytes = capacity.free_bytes,
                required = capacity.required_with_buffer,
                "Disk space ran low during download"
            );
            self.inner
                .shortage_required
                .store(capacity.required_with_buffer, Ordering::Relaxed);
            self.inner
                .shortage_available
                .store(capacity.free_bytes, Ordering::Relaxed);
            self.inner.shortage.store(true, Ordering::Release);
        }
    }
}
