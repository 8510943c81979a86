//! HTTP client for one upstream provider.
//!
//! Every request first waits on the provider's [`RateLimiter`], then runs
//! under both the reqwest timeout and a hard wall-clock ceiling. The client
//! never retries on its own; callers decide using
//! [`ProviderError::is_retryable`].

use crate::errors::ProviderError;
use crate::metrics;
use crate::rate_limiter::{DirectRateLimiter, RateLimiter};
use crate::settings::ProviderConfig;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Slack added on top of the HTTP timeout for the wall-clock ceiling.
const HARD_CEILING_SLACK: Duration = Duration::from_secs(5);

pub struct RateLimitedClient {
    provider: String,
    base_url: Url,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl RateLimitedClient {
    pub fn new(
        provider: impl Into<String>,
        base_url: &str,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Result<Self> {
        // Url::join replaces the last path segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).with_context(|| format!("invalid base url {}", base_url))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            provider: provider.into(),
            base_url,
            http,
            limiter,
            timeout,
        })
    }

    /// Builds a client with its own sliding window from a provider section.
    /// `global_quota` is shared with the other providers' clients.
    pub fn from_config(
        provider: &str,
        cfg: &ProviderConfig,
        global_quota: Option<Arc<DirectRateLimiter>>,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(
            provider,
            cfg.rate_limit,
            Duration::from_millis(cfg.window_ms),
            Duration::from_millis(cfg.buffer_ms),
        )
        .with_smoothing(global_quota);

        Self::new(
            provider,
            &cfg.base_url,
            Arc::new(limiter),
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Issues `GET {base_url}/{endpoint}?{params}` and returns the JSON body.
    pub async fn request(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let url = self.endpoint_url(endpoint, params)?;

        self.limiter.acquire().await;
        debug!(provider = %self.provider, %url, "provider request");

        let ceiling = self.timeout + HARD_CEILING_SLACK;
        let result = match tokio::time::timeout(ceiling, self.send(endpoint, url)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: self.provider.clone(),
                endpoint: endpoint.to_string(),
                timeout_ms: ceiling.as_millis() as u64,
            }),
        };

        if let Err(e) = &result {
            warn!("⚠️ [{}] request to {} failed: {}", self.provider, endpoint, e);
            metrics::increment_provider_error(&self.provider, error_kind(e));
        }
        result
    }

    async fn send(&self, endpoint: &str, url: Url) -> Result<Value, ProviderError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                provider: self.provider.clone(),
                endpoint: endpoint.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.provider.clone(),
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(endpoint, e)
            } else {
                ProviderError::Decode {
                    provider: self.provider.clone(),
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    fn endpoint_url(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Url, ProviderError> {
        let mut url = self
            .base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| ProviderError::Decode {
                provider: self.provider.clone(),
                endpoint: endpoint.to_string(),
                message: format!("invalid endpoint: {}", e),
            })?;
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn transport_error(&self, endpoint: &str, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: self.provider.clone(),
                endpoint: endpoint.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ProviderError::Network {
                provider: self.provider.clone(),
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

fn error_kind(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::Status { .. } => "status",
        ProviderError::RateLimited { .. } => "rate_limited",
        ProviderError::Timeout { .. } => "timeout",
        ProviderError::Network { .. } => "network",
        ProviderError::Decode { .. } => "decode",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response per accepted connection.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}/api/v2", addr)
    }

    fn client(base: &str) -> RateLimitedClient {
        let limiter = Arc::new(RateLimiter::new("mock", 10, Duration::from_secs(1), Duration::ZERO));
        RateLimitedClient::new("mock", base, limiter, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let client = client("https://api.example.com/api/v2");
        let url = client
            .endpoint_url("/networks/eth/pools/0xabc/ohlcv/hour", &[("limit", "10".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/v2/networks/eth/pools/0xabc/ohlcv/hour?limit=10"
        );
    }

    #[tokio::test]
    async fn test_success_returns_body_verbatim() {
        let base = serve(vec![(200, r#"{"data":{"ok":true}}"#)]).await;
        let body = client(&base).request("pools", &[]).await.unwrap();
        assert_eq!(body, serde_json::json!({"data": {"ok": true}}));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let base = serve(vec![(429, "{}"), (503, "{}"), (404, "{}")]).await;
        let client = client(&base);

        let rate_limited = client.request("pools", &[]).await.unwrap_err();
        assert!(matches!(rate_limited, ProviderError::RateLimited { .. }));
        assert!(rate_limited.is_retryable());

        let unavailable = client.request("pools", &[]).await.unwrap_err();
        assert_eq!(unavailable.status(), Some(503));
        assert!(unavailable.is_retryable());

        let missing = client.request("pools", &[]).await.unwrap_err();
        assert_eq!(missing.status(), Some(404));
        assert_eq!(missing.endpoint(), "pools");
        assert!(!missing.is_retryable());
    }

    /// Accepts connections and never answers.
    async fn serve_silence() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_silent_provider_times_out_as_retryable() {
        let base = serve_silence().await;
        let limiter = Arc::new(RateLimiter::new("mock", 10, Duration::from_secs(1), Duration::ZERO));
        let client = RateLimitedClient::new("mock", &base, limiter, Duration::from_millis(300)).unwrap();

        let started = std::time::Instant::now();
        let err = client.request("x", &[]).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ProviderError::Timeout { .. }), "got {:?}", err);
        assert!(err.is_retryable());
        assert_eq!(err.endpoint(), "x");
        // Cut off well before the hard ceiling (timeout + 5s)
        assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_request_counts_usage() {
        let base = serve(vec![(200, "[]"), (200, "[]")]).await;
        let client = client(&base);
        client.request("a", &[]).await.unwrap();
        client.request("b", &[]).await.unwrap();
        let total: u64 = client.limiter().usage().iter().map(|(_, c)| c).sum();
        assert_eq!(total, 2);
    }
}
