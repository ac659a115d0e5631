//! Configuration types for hls-dl

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// HTTP client settings shared by playlist, key and segment requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent with every request (default: a desktop Chrome string)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for playlist requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub playlist_timeout: Duration,

    /// Timeout for segment requests (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub segment_timeout: Duration,

    /// Timeout for key requests (default: 10 seconds)
    #[serde(default = "default_key_timeout", with = "duration_serde")]
    pub key_timeout: Duration,

    /// Extra headers added to every request (e.g. Referer, Origin)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            playlist_timeout: default_request_timeout(),
            segment_timeout: default_request_timeout(),
            key_timeout: default_key_timeout(),
            headers: HashMap::new(),
        }
    }
}

/// Worker pool settings for the segment scheduler
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent segment workers for the first pass (default: 32)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Fetch attempts per segment per pass (default: 3)
    #[serde(default = "default_segment_attempts")]
    pub attempts: u32,

    /// Linear backoff step between attempts; attempt `k` waits `k * step` (default: 200ms)
    #[serde(default = "default_attempt_backoff", with = "duration_ms_serde")]
    pub attempt_backoff: Duration,

    /// Re-resolve the segment URL from the playlist before the last attempt (default: true)
    #[serde(default = "default_true")]
    pub refresh_url_on_last_attempt: bool,

    /// Save progress every N completed segments (default: 25)
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every_segments: usize,

    /// Save progress at least this often while segments complete (default: 10 seconds)
    #[serde(default = "default_checkpoint_interval", with = "duration_serde")]
    pub checkpoint_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            attempts: default_segment_attempts(),
            attempt_backoff: default_attempt_backoff(),
            refresh_url_on_last_attempt: true,
            checkpoint_every_segments: default_checkpoint_every(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Adaptive 403 throttle settings
///
/// Every 403 bumps a shared counter. When it reaches `threshold` the extra delay
/// grows by `step` (capped at `max_delay`) and the counter resets. Each success
/// while the counter is nonzero knocks `success_decrement` off the counter and
/// `decay_step` off the delay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Consecutive 403s before the delay grows (default: 12)
    #[serde(default = "default_throttle_threshold")]
    pub threshold: u32,

    /// Counter reduction per success (default: 3)
    #[serde(default = "default_success_decrement")]
    pub success_decrement: u32,

    /// Delay increase per burst (default: 50ms)
    #[serde(default = "default_throttle_step", with = "duration_ms_serde")]
    pub step: Duration,

    /// Delay decrease per success (default: 20ms)
    #[serde(default = "default_throttle_decay", with = "duration_ms_serde")]
    pub decay_step: Duration,

    /// Upper bound for the extra delay (default: 150ms)
    #[serde(default = "default_throttle_max", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Workers only back off when the delay exceeds this (default: 10ms)
    #[serde(default = "default_backpressure_threshold", with = "duration_ms_serde")]
    pub backpressure_threshold: Duration,

    /// Fraction of the delay a worker sleeps before fetching (default: 0.2)
    #[serde(default = "default_backpressure_fraction")]
    pub backpressure_fraction: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            threshold: default_throttle_threshold(),
            success_decrement: default_success_decrement(),
            step: default_throttle_step(),
            decay_step: default_throttle_decay(),
            max_delay: default_throttle_max(),
            backpressure_threshold: default_backpressure_threshold(),
            backpressure_fraction: default_backpressure_fraction(),
        }
    }
}

/// Multi-pass retry and circuit-breaker policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Abort when `failed / total` exceeds this after a pass (default: 0.5)
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,

    /// Batch retry passes after the first pass (default: 7)
    #[serde(default = "default_retry_passes")]
    pub retry_passes: u32,

    /// Worker cap during batch retries (default: 16)
    #[serde(default = "default_retry_workers")]
    pub retry_workers: usize,

    /// Wait before retry pass `n` is `min((1 + n) * step, cap)` (default: 1 second)
    #[serde(default = "default_pass_wait_step", with = "duration_ms_serde")]
    pub pass_wait_step: Duration,

    /// Upper bound for the inter-pass wait (default: 8 seconds)
    #[serde(default = "default_pass_wait_cap", with = "duration_ms_serde")]
    pub pass_wait_cap: Duration,

    /// Retry passes that must run before the failure-rate breaker may trip again (default: 3)
    #[serde(default = "default_min_passes_before_abort")]
    pub min_passes_before_abort: u32,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_failure_rate: default_max_failure_rate(),
            retry_passes: default_retry_passes(),
            retry_workers: default_retry_workers(),
            pass_wait_step: default_pass_wait_step(),
            pass_wait_cap: default_pass_wait_cap(),
            min_passes_before_abort: default_min_passes_before_abort(),
        }
    }
}

/// Retry configuration for transient failures
///
/// Used by [`download_with_retry`](crate::retry::download_with_retry). The key
/// cache uses a flat 2 second pause between 3 attempts, so its defaults differ
/// from the generic ones: see [`KeyConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Decryption key fetching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Retry behavior for key requests (default: 3 attempts total, fixed 2 second pause)
    #[serde(default = "default_key_retry")]
    pub retry: RetryConfig,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            retry: default_key_retry(),
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Multiplier applied to the estimated size (default: 1.1)
    #[serde(default = "default_size_multiplier")]
    pub size_multiplier: f64,

    /// Assumed segment size when the origin does not report one (default: 2 MiB)
    #[serde(default = "default_fallback_segment_size")]
    pub fallback_segment_size: u64,

    /// Re-check capacity every N completed segments, 0 disables (default: 50)
    #[serde(default = "default_monitor_every")]
    pub monitor_every_segments: usize,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_multiplier: default_size_multiplier(),
            fallback_segment_size: default_fallback_segment_size(),
            monitor_every_segments: default_monitor_every(),
        }
    }
}

/// Main configuration for [`HlsDownloader`](crate::HlsDownloader)
///
/// Fields are organized into sub-configs:
/// - [`http`](HttpConfig) - client headers and timeouts
/// - [`scheduler`](SchedulerConfig) - worker pool and per-segment attempts
/// - [`throttle`](ThrottleConfig) - adaptive 403 throttle
/// - [`retry`](RetryPolicyConfig) - batch retry passes and circuit breaker
/// - [`keys`](KeyConfig) - key fetch retries
/// - [`disk_space`](DiskSpaceConfig) - capacity preflight and monitoring
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Segment worker pool settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Adaptive 403 throttle
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Batch retry and circuit breaker policy
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Key fetching
    #[serde(default)]
    pub keys: KeyConfig,

    /// Disk space checks
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Request limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Input validation limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Longest accepted playlist URL in characters (default: 3000)
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,

    /// Segment count above which a warning is logged (default: 10000)
    #[serde(default = "default_segment_warning")]
    pub segment_warning_threshold: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_url_length: default_max_url_length(),
            segment_warning_threshold: default_segment_warning(),
        }
    }
}

impl Config {
    /// Check settings that would make a download impossible
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.workers == 0 {
            return Err(config_error("workers must be at least 1", "scheduler.workers"));
        }
        if self.scheduler.attempts == 0 {
            return Err(config_error(
                "attempts must be at least 1",
                "scheduler.attempts",
            ));
        }
        if self.retry.retry_workers == 0 {
            return Err(config_error(
                "retry_workers must be at least 1",
                "retry.retry_workers",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.max_failure_rate) {
            return Err(config_error(
                "max_failure_rate must be between 0.0 and 1.0",
                "retry.max_failure_rate",
            ));
        }
        if !(0.0..=1.0).contains(&self.throttle.backpressure_fraction) {
            return Err(config_error(
                "backpressure_fraction must be between 0.0 and 1.0",
                "throttle.backpressure_fraction",
            ));
        }
        if self.disk_space.size_multiplier < 1.0 {
            return Err(config_error(
                "size_multiplier must be at least 1.0",
                "disk_space.size_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> crate::Error {
    crate::Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_key_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_workers() -> usize {
    32
}

fn default_segment_attempts() -> u32 {
    3
}

fn default_attempt_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_checkpoint_every() -> usize {
    25
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_throttle_threshold() -> u32 {
    12
}

fn default_success_decrement() -> u32 {
    3
}

fn default_throttle_step() -> Duration {
    Duration::from_millis(50)
}

fn default_throttle_decay() -> Duration {
    Duration::from_millis(20)
}

fn default_throttle_max() -> Duration {
    Duration::from_millis(150)
}

fn default_backpressure_threshold() -> Duration {
    Duration::from_millis(10)
}

fn default_backpressure_fraction() -> f64 {
    0.2
}

fn default_max_failure_rate() -> f64 {
    0.5
}

fn default_retry_passes() -> u32 {
    7
}

fn default_retry_workers() -> usize {
    16
}

fn default_pass_wait_step() -> Duration {
    Duration::from_secs(1)
}

fn default_pass_wait_cap() -> Duration {
    Duration::from_secs(8)
}

fn default_min_passes_before_abort() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_key_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 1.0,
        jitter: false,
    }
}

fn default_size_multiplier() -> f64 {
    1.1
}

fn default_fallback_segment_size() -> u64 {
    2 * 1024 * 1024
}

fn default_monitor_every() -> usize {
    50
}

fn default_max_url_length() -> usize {
    3000
}

fn default_segment_warning() -> usize {
    10_000
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
