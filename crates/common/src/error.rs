use thiserror::Error;

use crate::types::{BatchReport, ProbeResult};

/// Common error types used across the engine.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Unknown channel, missing destination or an invalid setting. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structurally invalid probe input (e.g. a row without `is_warning`).
    #[error("Invalid probe input: {0}")]
    InvalidInput(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Control signal: the interrupt policy fired and the caller's pipeline must stop.
    #[error("{0}")]
    Interrupted(Box<PipelineInterrupt>),
}

impl ProbeError {
    /// The interrupt payload, if this is a pipeline interrupt.
    pub fn as_interrupt(&self) -> Option<&PipelineInterrupt> {
        match self {
            ProbeError::Interrupted(interrupt) => Some(interrupt),
            _ => None,
        }
    }
}

/// Raised when a result is severe enough to halt the invoking pipeline.
#[derive(Debug, Clone)]
pub struct PipelineInterrupt {
    /// The result whose level triggered the interrupt.
    pub cause: ProbeResult,
    /// The partial batch report, when raised from a batch run.
    pub report: Option<BatchReport>,
}

impl PipelineInterrupt {
    pub fn new(cause: ProbeResult) -> Self {
        Self {
            cause,
            report: None,
        }
    }

    pub fn with_report(mut self, report: BatchReport) -> Self {
        self.report = Some(report);
        self
    }
}

impl std::fmt::Display for PipelineInterrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline interrupted by {} alert: {} [{}]",
            self.cause.level, self.cause.alert_name, self.cause.alert_info
        )
    }
}

impl From<PipelineInterrupt> for ProbeError {
    fn from(value: PipelineInterrupt) -> Self {
        ProbeError::Interrupted(Box::new(value))
    }
}

/// Failure classification returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Timeouts, 5xx-equivalent responses, connection errors.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Malformed payload or authentication failure.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}
