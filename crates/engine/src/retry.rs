//! Delivery retrier: bounded attempts with fixed or linear backoff.
//!
//! Only transient failures are retried. A permanent failure ends the loop at
//! once and is reported with the attempts made so far.

use std::time::Duration;

use probe_common::{AsyncTransport, DeliveryError, EngineConfig, Payload, RetryBackoff, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            delay: config.retry_delay,
            backoff: config.retry_backoff,
        }
    }
}

/// Result of one retried send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub attempts: u32,
    /// Last error when every attempt failed.
    pub error: Option<DeliveryError>,
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        self.error.is_none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            backoff: RetryBackoff::Fixed,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Linear => self.delay.saturating_mul(retry),
        }
    }

    /// Whether the loop should go on after `attempt` failed with `error`.
    fn should_retry(&self, attempt: u32, error: &DeliveryError, transport: &str) -> bool {
        if !error.is_transient() {
            tracing::warn!(transport, attempt, error = %error, "Delivery failed permanently");
            return false;
        }
        if attempt >= self.attempts() {
            tracing::warn!(transport, attempts = attempt, error = %error, "Delivery retries exhausted");
            return false;
        }
        tracing::warn!(
            transport,
            attempt,
            max_attempts = self.attempts(),
            delay_ms = self.delay_before(attempt).as_millis() as u64,
            error = %error,
            "Transient delivery failure, retrying"
        );
        true
    }

    /// Send through a blocking transport, sleeping the thread between attempts.
    pub fn send_blocking(
        &self,
        transport: &dyn Transport,
        payload: &Payload,
        destination: &str,
    ) -> DeliveryOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match transport.send(payload, destination) {
                Ok(()) => {
                    return DeliveryOutcome {
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    if !self.should_retry(attempt, &e, transport.name()) {
                        return DeliveryOutcome {
                            attempts: attempt,
                            error: Some(e),
                        };
                    }
                    std::thread::sleep(self.delay_before(attempt));
                }
            }
        }
    }

    /// Send through an async transport; the delay suspends instead of blocking.
    pub async fn send_async(
        &self,
        transport: &dyn AsyncTransport,
        payload: &Payload,
        destination: &str,
    ) -> DeliveryOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match transport.send(payload, destination).await {
                Ok(()) => {
                    return DeliveryOutcome {
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    if !self.should_retry(attempt, &e, transport.name()) {
                        return DeliveryOutcome {
                            attempts: attempt,
                            error: Some(e),
                        };
                    }
                    tokio::time::sleep(self.delay_before(attempt)).await;
                }
            }
        }
    }
}
