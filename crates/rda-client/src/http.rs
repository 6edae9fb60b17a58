//! Retrying HTTP transport for the RDA API.
//!
//! Transient failures (connect errors, timeouts, 5xx) are retried with
//! exponential backoff; anything else surfaces immediately. Every await
//! point is raced against the caller's cancellation token.

use std::time::Duration;

use rda_common::{RdaError, RdaResult};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bearer token attached to every request, when present.
    pub token: Option<String>,
    /// Maximum number of retry attempts for transient failures.
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry).
    pub initial_retry_delay: Duration,
    /// Maximum retry delay.
    pub max_retry_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            token: None,
            max_retries: 4,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Shared, thread-safe HTTP client with a retry policy.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

/// The error body RDA hands back on failures: `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct RdaErrorBody {
    error: String,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> RdaResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RdaError::ServerError(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn get_builder(&self, url: Url, accept: Option<&str>) -> RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(accept) = accept {
            req = req.header(header::ACCEPT, accept);
        }
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }
        req
    }

    fn post_builder<B: Serialize>(&self, url: Url, body: &B) -> RequestBuilder {
        let mut req = self.client.post(url).json(body);
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// GET returning the decoded JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> RdaResult<T> {
        let res = self.get_raw(url, None, cancel).await?;
        res.json::<T>()
            .await
            .map_err(|e| RdaError::ServerError(format!("failed decoding response: {}", e)))
    }

    /// GET returning the raw body text.
    pub async fn get_text(&self, url: Url, cancel: &CancellationToken) -> RdaResult<String> {
        let res = self.get_raw(url, None, cancel).await?;
        res.text()
            .await
            .map_err(|e| RdaError::ServerError(format!("failed reading response: {}", e)))
    }

    /// GET returning the successful response for streaming, with an optional
    /// Accept header.
    pub async fn get_raw(
        &self,
        url: Url,
        accept: Option<&str>,
        cancel: &CancellationToken,
    ) -> RdaResult<Response> {
        let accept = accept.map(str::to_owned);
        self.execute(|| self.get_builder(url.clone(), accept.as_deref()), cancel)
            .await
    }

    /// POST a JSON body, returning the decoded JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
        cancel: &CancellationToken,
    ) -> RdaResult<T> {
        let res = self
            .execute(|| self.post_builder(url.clone(), body), cancel)
            .await?;
        res.json::<T>()
            .await
            .map_err(|e| RdaError::ServerError(format!("failed decoding response: {}", e)))
    }

    /// Send the request built by `build`, retrying transient failures.
    /// Returns only successful responses; non-2xx statuses become
    /// [`RdaError::Http`] after the RDA error body is decoded.
    async fn execute(
        &self,
        build: impl Fn() -> RequestBuilder,
        cancel: &CancellationToken,
    ) -> RdaResult<Response> {
        let mut attempt: u32 = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            let result = tokio::select! {
                r = build().send() => r,
                _ = cancel.cancelled() => return Err(RdaError::Cancelled),
            };

            let retryable = match &result {
                Ok(res) => is_retryable_status(res.status()),
                Err(e) => is_retryable_transport(e),
            };

            if !retryable || attempt >= self.config.max_retries {
                return match result {
                    Ok(res) if res.status().is_success() => Ok(res),
                    Ok(res) => Err(response_to_error(res).await),
                    Err(e) => Err(RdaError::ServerError(format!("request failed: {}", e))),
                };
            }

            attempt += 1;
            match &result {
                Ok(res) => warn!(
                    status = res.status().as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                ),
                Err(e) => warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(RdaError::Cancelled),
            }
            delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Decode an errant RDA response into an error, preferring the server's own
/// `{"error": "..."}` message over the bare status line.
pub(crate) async fn response_to_error(res: Response) -> RdaError {
    let status = res.status();
    let message = match res.bytes().await {
        Ok(body) => match serde_json::from_slice::<RdaErrorBody>(&body) {
            Ok(b) if !b.error.is_empty() => b.error,
            _ => status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        },
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    };
    debug!(status = status.as_u16(), message = %message, "request failed");

    RdaError::Http {
        status: status.as_u16(),
        message,
    }
}
