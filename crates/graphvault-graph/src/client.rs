//! Typed HTTP client for graph-style APIs
//!
//! Wraps `reqwest::Client` with bearer authentication, base-URL handling,
//! and a retry loop for transient failures. Retries use exponential backoff
//! with jitter and honor the server's `Retry-After` header when present.

use std::time::Duration;

use graphvault_core::domain::EngineError;
use rand::Rng;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{classify_request_error, classify_status};

/// Base URL for the production endpoint
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Retries for transient failures before escalating
const MAX_RETRIES: u32 = 4;

/// Base delay for exponential backoff
const BASE_DELAY: Duration = Duration::from_millis(800);

/// Fallback when a 429 carries no usable Retry-After header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Authenticated HTTP client with retry
pub struct GraphClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    /// Create a client against the production endpoint
    ///
    /// # Errors
    /// Returns `EngineError::Transport` if the underlying client cannot
    /// be constructed
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        Self::with_base_url(access_token, GRAPH_BASE_URL, timeout)
    }

    /// Create a client against a custom base URL (tests point this at a
    /// mock server)
    ///
    /// # Errors
    /// Returns `EngineError::Transport` if the underlying client cannot
    /// be constructed
    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport {
                status: None,
                message: format!("building http client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
        })
    }

    /// Replace the access token after a refresh
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("access token updated");
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// An authenticated request builder for a path relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url).bearer_auth(&self.access_token)
    }

    /// An authenticated request builder for an absolute URL
    /// (continuation links are absolute)
    pub fn request_url(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.access_token)
    }

    /// GET a relative path and decode the JSON body
    ///
    /// # Errors
    /// Classified per the engine taxonomy; transient failures are retried
    /// before surfacing
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        context: &str,
    ) -> Result<T, EngineError> {
        let response = self
            .execute_with_retry(|| self.request(Method::GET, path), context)
            .await?;
        decode_json(response, context).await
    }

    /// GET an absolute URL and decode the JSON body
    ///
    /// # Errors
    /// Classified per the engine taxonomy; transient failures are retried
    /// before surfacing
    pub async fn get_json_url<T: DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, EngineError> {
        let response = self
            .execute_with_retry(|| self.request_url(Method::GET, url), context)
            .await?;
        decode_json(response, context).await
    }

    /// GET an absolute URL and return the raw bytes (content downloads)
    ///
    /// # Errors
    /// Classified per the engine taxonomy
    pub async fn get_bytes_url(&self, url: &str, context: &str) -> Result<Vec<u8>, EngineError> {
        let response = self
            .execute_with_retry(|| self.request_url(Method::GET, url), context)
            .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_request_error(&e, context))?;

        Ok(bytes.to_vec())
    }

    /// GET a relative path and return the raw bytes
    ///
    /// # Errors
    /// Classified per the engine taxonomy
    pub async fn get_bytes(&self, path: &str, context: &str) -> Result<Vec<u8>, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        self.get_bytes_url(&url, context).await
    }

    /// Send with retry on transient failures
    ///
    /// The builder closure is re-invoked per attempt since a
    /// `RequestBuilder` is single-use.
    async fn execute_with_retry<F>(
        &self,
        build: F,
        context: &str,
    ) -> Result<Response, EngineError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = build().send().await;

            let err = match result {
                Ok(response) if response.status().is_success() => {
                    if attempt > 0 {
                        info!(context, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(&response);
                    let body = response.text().await.unwrap_or_default();
                    let err = classify_status(status, &body, context);

                    if err.is_transient() && attempt < MAX_RETRIES {
                        let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                            retry_after.unwrap_or(DEFAULT_RETRY_AFTER)
                        } else {
                            backoff_delay(attempt)
                        };

                        warn!(
                            context,
                            attempt,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis() as u64,
                            "transient failure, backing off"
                        );

                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    err
                }
                Err(e) => {
                    let err = classify_request_error(&e, context);

                    if err.is_transient() && attempt < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        warn!(
                            context,
                            attempt,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "request failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    err
                }
            };

            return Err(err);
        }
    }
}

async fn decode_json<T: DeserializeOwned>(
    response: Response,
    context: &str,
) -> Result<T, EngineError> {
    response
        .json()
        .await
        .map_err(|e| EngineError::Validation(format!("{context}: decoding response body: {e}")))
}

/// Exponential backoff with jitter: `base * 2^attempt + rand(0..base)`
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = rand::thread_rng().gen_range(0..BASE_DELAY.as_millis() as u64);
    exp + Duration::from_millis(jitter_ms)
}

/// Parse a `Retry-After` header carrying delay-seconds
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
