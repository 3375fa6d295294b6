//! Feishu webhook transports.
//!
//! Posts a rendered card as JSON to a bot webhook URL and classifies the
//! outcome. Feishu answers HTTP 200 even for rejected messages, so success is
//! decided by the `code` (or legacy `StatusCode`) field of the response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use probe_common::{AsyncTransport, DeliveryError, Payload, Transport};

pub const TRANSPORT_NAME: &str = "feishu-webhook";

/// Feishu's "too many requests" business code.
const RATE_LIMITED_CODE: i64 = 11232;

#[derive(Debug, Default, Deserialize)]
struct FeishuResponse {
    code: Option<i64>,
    msg: Option<String>,
    #[serde(rename = "StatusCode")]
    status_code: Option<i64>,
    #[serde(rename = "StatusMessage")]
    status_message: Option<String>,
}

/// Map an HTTP status plus body to a delivery outcome.
fn classify_response(status: StatusCode, body: &str) -> Result<(), DeliveryError> {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(DeliveryError::Transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(DeliveryError::Permanent(format!("HTTP {}: {}", status, body)));
    }

    let response: FeishuResponse = serde_json::from_str(body)
        .map_err(|e| DeliveryError::Permanent(format!("unreadable response body: {}", e)))?;

    if response.code == Some(0) || response.status_code == Some(0) {
        return Ok(());
    }

    let code = response.code.or(response.status_code);
    let message = response
        .msg
        .or(response.status_message)
        .unwrap_or_else(|| "unknown error".to_string());

    match code {
        Some(RATE_LIMITED_CODE) => Err(DeliveryError::Transient(format!(
            "rate limited ({}): {}",
            RATE_LIMITED_CODE, message
        ))),
        Some(code) => Err(DeliveryError::Permanent(format!("code {}: {}", code, message))),
        None => Err(DeliveryError::Permanent(message)),
    }
}

/// Timeouts and connection failures are worth retrying; a request that could
/// not even be built is not.
fn classify_request_error(err: &reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::Permanent(format!("invalid request: {}", err))
    } else if err.is_timeout() {
        DeliveryError::Transient(format!("timed out: {}", err))
    } else {
        DeliveryError::Transient(err.to_string())
    }
}

/// Non-blocking webhook sender.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AsyncTransport for WebhookTransport {
    async fn send(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(destination)
            .json(payload.as_json())
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(&e))?;

        classify_response(status, &body)?;
        tracing::debug!(status = %status, "Webhook accepted message");
        Ok(())
    }

    fn name(&self) -> &str {
        TRANSPORT_NAME
    }
}

/// Blocking webhook sender for callers outside an async runtime.
#[derive(Debug, Clone)]
pub struct BlockingWebhookTransport {
    client: reqwest::blocking::Client,
}

impl BlockingWebhookTransport {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for BlockingWebhookTransport {
    fn send(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(destination)
            .json(payload.as_json())
            .send()
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        let body = response.text().map_err(|e| classify_request_error(&e))?;

        classify_response(status, &body)?;
        tracing::debug!(status = %status, "Webhook accepted message");
        Ok(())
    }

    fn name(&self) -> &str {
        TRANSPORT_NAME
    }
}
