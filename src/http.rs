//! HTTP client construction and response classification
//!
//! One client is built per [`HlsDownloader`](crate::HlsDownloader) and shared by
//! the playlist resolver, the key cache and every segment worker. Timeouts are
//! set per request since they differ between the three.

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Build the shared client with browser-like default headers
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let mut headers = default_headers();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Config {
            message: format!("invalid header name '{name}': {e}"),
            key: Some("http.headers".to_string()),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| Error::Config {
            message: format!("invalid value for header '{name}': {e}"),
            key: Some("http.headers".to_string()),
        })?;
        headers.insert(name, value);
    }

    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .build()
        .map_err(Error::Network)
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    headers
}

/// GET `url` and return the body; non-2xx statuses become [`Error::HttpStatus`]
pub async fn fetch_bytes(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<Bytes> {
    let response = client.get(url).timeout(timeout).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response.bytes().await?)
}

/// HEAD `url` and return its `Content-Length`, if the origin reports one
///
/// Used only for the disk space estimate, so every failure maps to `None`.
pub async fn probe_content_length(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Option<u64> {
    let response = match client.head(url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::debug!(url, status = %response.status(), "Size probe rejected");
            return None;
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "Size probe failed");
            return None;
        }
    };

    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&len| len > 0)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn fetch_bytes_returns_body_and_sends_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg.ts"))
            .and(header("referer", "https://site.example.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = HttpConfig::default();
        config
            .headers
            .insert("Referer".to_string(), "https://site.example.com/".to_string());
        let client = build_client(&config).unwrap();

        let body = fetch_bytes(&client, &format!("{}/seg.ts", server.uri()), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(body.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn fetch_bytes_maps_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = build_client(&HttpConfig::default()).unwrap();
        let err = fetch_bytes(&client, &format!("{}/seg.ts", server.uri()), TIMEOUT)
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(err.http_status(), Some(403));
    }

    #[tokio::test]
    async fn probe_reads_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/seg.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let client = build_client(&HttpConfig::default()).unwrap();

        let size =
            probe_content_length(&client, &format!("{}/seg.ts", server.uri()), TIMEOUT).await;
        assert_eq!(size, Some(4096));

        let missing =
            probe_content_length(&client, &format!("{}/other.ts", server.uri()), TIMEOUT).await;
        assert_eq!(missing, None, "404 probes fall back to the configured estimate");
    }

    #[test]
    fn invalid_header_is_a_config_error() {
        let mut config = HttpConfig::default();
        config
            .headers
            .insert("Bad Header".to_string(), "x".to_string());

        match build_client(&config) {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("http.headers")),
            other => panic!("expected Config error, got {:?}", other.map(|_| ())),
        }
    }
}
