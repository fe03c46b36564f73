//! HTTP delivery with 429 backoff.
//!
//! A payload is serialized once; those exact bytes are signed and posted on
//! every attempt. Only `429 Too Many Requests` is retried.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, warn};

use crate::delivery::signing::{SIGNATURE_HEADER, sign_payload};
use crate::error::DeliveryError;
use crate::routing::WebhookDestination;

/// Default first backoff delay after a 429.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(512);

/// Default total number of HTTP attempts per delivery.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Exponential backoff for rate-limited deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RETRY_BASE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Result of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub body: String,
    /// Number of backoff sleeps taken before success.
    pub retries: u32,
}

/// Posts signed JSON payloads to webhook destinations.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl DeliveryClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self::with_client(http, retry))
    }

    pub fn with_client(http: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Deliver `payload` to `destination`, retrying while rate limited.
    pub async fn deliver<P: Serialize + ?Sized>(
        &self,
        destination: &WebhookDestination,
        payload: &P,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let body = serde_json::to_string(payload)?;
        let signature = destination
            .secret
            .as_ref()
            .map(|secret| sign_payload(secret.expose_secret(), body.as_bytes()))
            .transpose()?;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut retries = 0;

        loop {
            let response = self
                .request(destination, &body, signature.as_deref())
                .send()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let attempts = retries + 1;
                if attempts >= max_attempts {
                    return Err(DeliveryError::RateLimited { attempts });
                }
                let delay = self.retry.delay_for(retries);
                warn!(
                    url = %destination.url,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retries += 1;
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        url = %destination.url,
                        status = status.as_u16(),
                        error = %e,
                        "Failed to read response body"
                    );
                    String::new()
                }
            };
            if !status.is_success() {
                return Err(DeliveryError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }

            debug!(url = %destination.url, status = status.as_u16(), retries, "Delivered");
            return Ok(DeliveryReceipt {
                status: status.as_u16(),
                body: text,
                retries,
            });
        }
    }

    fn request(
        &self,
        destination: &WebhookDestination,
        body: &str,
        signature: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http.post(&destination.url);
        if !destination.extra_params.is_empty() {
            request = request.query(&destination.extra_params);
        }
        for (name, value) in &destination.extra_headers {
            // Content-Type is always JSON.
            if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                continue;
            }
            request = request.header(name, value);
        }
        request = request.header(CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        request.body(body.to_owned())
    }
}
