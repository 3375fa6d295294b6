pub mod config;
pub mod delivery;
pub mod error;
pub mod types;

pub use config::{EngineConfig, RateLimitScope, RetryBackoff};
pub use delivery::{
    AsyncTransport, Link, Payload, QueryEngine, RenderContext, Renderer, Row, Transport,
};
pub use error::{DeliveryError, PipelineInterrupt, ProbeError};
pub use types::{BatchReport, Level, ProbeResult, Status, Suppression};
