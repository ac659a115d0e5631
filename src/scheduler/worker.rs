//! Per-segment pipeline: resume check, backpressure, fetch with retry, decrypt, atomic write.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::decrypt::decrypt_offloaded;
use crate::error::Error;
use crate::http::fetch_bytes;
use crate::playlist::PlaylistResolver;
use crate::throttle::RateLimiter;
use crate::types::{SegmentOutcome, SegmentTask};
use crate::utils::{nonempty_file_size, write_atomic};

/// State shared by every worker of one pass
pub(super) struct WorkerContext {
    pub(super) client: reqwest::Client,
    pub(super) config: Arc<SchedulerConfig>,
    pub(super) segment_timeout: Duration,
    pub(super) limiter: RateLimiter,
    pub(super) resolver: PlaylistResolver,
    pub(super) cancel_token: CancellationToken,
}

/// Bring one segment onto disk, or report why not
pub(super) async fn process_segment(ctx: Arc<WorkerContext>, task: SegmentTask) -> SegmentOutcome {
    let index = task.index;

    if let Some(size) = nonempty_file_size(&task.destination) {
        tracing::trace!(segment = index, size, "Segment already on disk");
        return SegmentOutcome::success(index, size);
    }

    if ctx.cancel_token.is_cancelled() {
        return SegmentOutcome::failure(index, false, "cancelled");
    }

    if let Some(pause) = ctx.limiter.backpressure() {
        tracing::trace!(segment = index, pause_ms = pause.as_millis() as u64, "Backing off");
        if !sleep_or_cancel(&ctx.cancel_token, pause).await {
            return SegmentOutcome::failure(index, false, "cancelled");
        }
    }

    let attempts = ctx.config.attempts.max(1);
    let mut url = task.url.clone();
    let mut last_error: Option<Error> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = ctx.config.attempt_backoff * attempt;
            if !sleep_or_cancel(&ctx.cancel_token, backoff).await {
                return SegmentOutcome::failure(index, false, "cancelled");
            }

            if attempt + 1 == attempts && ctx.config.refresh_url_on_last_attempt {
                match ctx.resolver.refresh_segment_url(&task.playlist_url, index).await {
                    Ok(fresh) => {
                        if fresh != url {
                            tracing::debug!(segment = index, "Segment URL refreshed");
                        }
                        url = fresh;
                    }
                    Err(e) => {
                        tracing::debug!(segment = index, error = %e, "URL refresh failed, keeping stale URL");
                    }
                }
            }
        }

        let fetched = tokio::select! {
            _ = ctx.cancel_token.cancelled() => {
                return SegmentOutcome::failure(index, false, "cancelled");
            }
            result = fetch_bytes(&ctx.client, &url, ctx.segment_timeout) => result,
        };

        match store_segment(&task, &url, fetched).await {
            Ok(size) => {
                ctx.limiter.record_success();
                if attempt > 0 {
                    tracing::debug!(segment = index, attempts = attempt + 1, "Segment succeeded after retry");
                }
                return SegmentOutcome::success(index, size);
            }
            Err(e) => {
                if e.is_rate_limited() {
                    ctx.limiter.record_rate_limited();
                }
                tracing::debug!(
                    segment = index,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %e,
                    "Segment attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    let rate_limited = last_error.as_ref().is_some_and(Error::is_rate_limited);
    let message = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());
    tracing::warn!(segment = index, rate_limited, error = %message, "Segment failed");
    SegmentOutcome::failure(index, rate_limited, message)
}

/// Validate, decrypt and persist a fetched body; returns the written size
async fn store_segment(
    task: &SegmentTask,
    url: &str,
    fetched: crate::Result<bytes::Bytes>,
) -> crate::Result<u64> {
    let body = fetched?;
    if body.is_empty() {
        return Err(Error::EmptyBody(url.to_string()));
    }

    let data = match &task.cipher {
        Some(cipher) => decrypt_offloaded(body, *cipher.key, cipher.iv).await?,
        None => body,
    };

    write_atomic(&task.destination, &data).await?;
    Ok(data.len() as u64)
}

/// Sleep for `duration`; returns `false` if cancelled first
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
