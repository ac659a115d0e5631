//! AES key fetching and caching
//!
//! Keys are fetched once per URI and kept for the lifetime of the cache, which
//! is one download. A payload that is not exactly 16 bytes is rejected without
//! retrying, since another request would return the same bytes.

use crate::config::KeyConfig;
use crate::error::{Error, Result};
use crate::http::fetch_bytes;
use crate::retry::download_with_retry;
use crate::utils::absolutize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Memoizing key fetcher, keyed by absolute key URI
pub struct KeyCache {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    config: KeyConfig,
    keys: Mutex<HashMap<String, Arc<[u8; 16]>>>,
}

impl KeyCache {
    /// Create an empty cache; relative URIs resolve against `base_url`
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
        config: KeyConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
            config,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Return the key at `uri`, fetching it on first use
    ///
    /// The cache lock is held across the fetch so concurrent callers asking
    /// for the same key share one request.
    pub async fn get_key(&self, uri: &str) -> Result<Arc<[u8; 16]>> {
        let absolute = absolutize(&self.base_url, uri).map_err(|e| Error::KeyFetch {
            uri: uri.to_string(),
            reason: format!("cannot resolve key URI: {e}"),
            retryable: false,
        })?;

        let mut keys = self.keys.lock().await;
        if let Some(key) = keys.get(&absolute) {
            return Ok(Arc::clone(key));
        }

        let key = Arc::new(self.fetch(&absolute).await?);
        tracing::debug!(key_uri = %absolute, "Fetched decryption key");
        keys.insert(absolute, Arc::clone(&key));
        Ok(key)
    }

    /// Number of cached keys
    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }

    /// Whether nothing has been fetched yet
    pub async fn is_empty(&self) -> bool {
        self.keys.lock().await.is_empty()
    }

    async fn fetch(&self, uri: &str) -> Result<[u8; 16]> {
        let client = &self.client;
        let timeout = self.timeout;
        download_with_retry(&self.config.retry, || async move {
            let body = fetch_bytes(client, uri, timeout)
                .await
                .map_err(|e| Error::KeyFetch {
                    uri: uri.to_string(),
                    reason: e.to_string(),
                    retryable: true,
                })?;

            <[u8; 16]>::try_from(body.as_ref()).map_err(|_| Error::KeyFetch {
                uri: uri.to_string(),
                reason: format!("expected 16 bytes, got {}", body.len()),
                retryable: false,
            })
        })
        .await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, RetryConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_keys() -> KeyConfig {
        KeyConfig {
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                backoff_multiplier: 1.0,
                jitter: false,
            },
        }
    }

    fn cache(server: &MockServer) -> KeyCache {
        let client = crate::http::build_client(&HttpConfig::default()).unwrap();
        KeyCache::new(
            client,
            format!("{}/hls/index.m3u8", server.uri()),
            Duration::from_secs(5),
            fast_keys(),
        )
    }

    #[tokio::test]
    async fn key_is_fetched_once_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/key.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes([7u8; 16].to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache(&server);
        let relative = cache.get_key("key.bin").await.unwrap();
        let absolute = cache
            .get_key(&format!("{}/hls/key.bin", server.uri()))
            .await
            .unwrap();

        assert_eq!(*relative, [7u8; 16]);
        assert!(Arc::ptr_eq(&relative, &absolute), "same URI shares one key");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn wrong_length_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/key.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 12]))
            .expect(1)
            .mount(&server)
            .await;

        let err = cache(&server).get_key("key.bin").await.unwrap_err();

        match err {
            Error::KeyFetch {
                reason, retryable, ..
            } => {
                assert!(reason.contains("expected 16 bytes, got 12"));
                assert!(!retryable);
            }
            other => panic!("expected KeyFetch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_three_times_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/key.bin"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let cache = cache(&server);
        let err = cache.get_key("key.bin").await.unwrap_err();

        assert!(matches!(err, Error::KeyFetch { .. }));
        assert!(cache.is_empty().await, "failures are not cached");
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hls/key.bin"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hls/key.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes([9u8; 16].to_vec()))
            .mount(&server)
            .await;

        let key = cache(&server).get_key("key.bin").await.unwrap();

        assert_eq!(*key, [9u8; 16]);
    }
}
