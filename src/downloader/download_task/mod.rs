//! Download task execution: the lifecycle of one HLS download.
//!
//! Split into focused submodules:
//! - [`context`] - Shared per-download state and on-disk layout
//! - [`orchestration`] - State machine, retry passes and circuit breaker
//! - [`batching`] - Preflight, task preparation and pass execution
//! - [`finalization`] - Completeness gate, merge and cleanup

mod batching;
mod context;
mod finalization;
mod orchestration;


pub(crate) use context::DownloadTaskContext;
pub(crate) use orchestration::run_download_task;
