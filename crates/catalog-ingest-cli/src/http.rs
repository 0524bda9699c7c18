//! Async HTTP client wrapping reqwest.
//!
//! Handles redirects, timeouts, conditional GETs, and retries with jittered
//! exponential backoff on connection errors, 5xx, and 429.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use catalog_ingest::config::FetchConfig;

/// Response from an HTTP request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .with_context(|| format!("invalid JSON from {}", self.final_url))
    }
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// HTTP client shared by the archive fetcher and the catalog client.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_attempts: u32,
    backoff_ms: u64,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.backoff_ms,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential backoff for the given retry number (1-based), jittered
    /// by a factor in `0.7..1.3`.
    fn backoff(&self, retry: u32) -> Duration {
        let base = self.backoff_ms.saturating_mul(1u64 << (retry - 1).min(16));
        let factor = rand::thread_rng().gen_range(0.7..1.3);
        Duration::from_millis((base as f64 * factor) as u64)
    }

    /// GET with retries. `etag` turns the request into a conditional one.
    ///
    /// A retryable status that survives every attempt is returned as-is;
    /// only transport errors become `Err`.
    pub async fn get(&self, url: &str, etag: Option<&str>) -> Result<HttpResponse> {
        self.send_with_retry(url, || {
            let mut builder = self.client.get(url);
            if let Some(tag) = etag {
                builder = builder.header(reqwest::header::IF_NONE_MATCH, tag);
            }
            builder
        })
        .await
    }

    /// GET a JSON document. `token` is sent verbatim as `Authorization`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, token: Option<&str>) -> Result<T> {
        let resp = self
            .send_with_retry(url, || {
                let builder = self.client.get(url);
                match token {
                    Some(t) => builder.header(reqwest::header::AUTHORIZATION, t),
                    None => builder,
                }
            })
            .await?;
        if !resp.is_success() {
            anyhow::bail!("GET {url} returned HTTP {}", resp.status);
        }
        resp.json()
    }

    /// POST a JSON body. Not retried: the caller decides what a failure means.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<HttpResponse> {
        let r = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        Self::collect(url, r, 1).await
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<HttpResponse>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 1u32;
        loop {
            match build().send().await {
                Ok(r) => {
                    let status = r.status().as_u16();
                    if is_retryable(status) && attempt < self.max_attempts {
                        let delay = if status == 429 {
                            r.headers()
                                .get(reqwest::header::RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(|s| s.parse::<u64>().ok())
                                .map(|secs| Duration::from_secs(secs.min(10)))
                                .unwrap_or_else(|| self.backoff(attempt))
                        } else {
                            self.backoff(attempt)
                        };
                        tracing::debug!("HTTP {status} from {url}, retry {attempt} in {delay:?}");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Self::collect(url, r, attempt).await;
                }
                Err(e) => {
                    if attempt < self.max_attempts {
                        let delay = self.backoff(attempt);
                        tracing::debug!(
                            "Request to {url} failed ({e}), retry {attempt} in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(anyhow::Error::new(e)
                        .context(format!("GET {url} failed after {attempt} attempts")));
                }
            }
        }
    }

    async fn collect(url: &str, r: reqwest::Response, attempts: u32) -> Result<HttpResponse> {
        let status = r.status().as_u16();
        let final_url = r.url().to_string();
        let header = |name: reqwest::header::HeaderName| {
            r.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let etag = header(reqwest::header::ETAG);
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let body = r
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {url}"))?
            .to_vec();
        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            etag,
            content_type,
            body,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new(&FetchConfig::default()).unwrap();
        assert_eq!(client.max_attempts(), 3);
    }

    #[test]
    fn test_backoff_grows_with_jitter() {
        let config = FetchConfig {
            backoff_ms: 1_000,
            ..Default::default()
        };
        let client = HttpClient::new(&config).unwrap();
        for _ in 0..20 {
            let first = client.backoff(1).as_millis();
            let third = client.backoff(3).as_millis();
            assert!((700..1300).contains(&first));
            assert!((2800..5200).contains(&third));
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(503));
        assert!(is_retryable(429));
        assert!(!is_retryable(404));
        assert!(!is_retryable(304));
    }
}
