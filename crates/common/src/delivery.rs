//! Collaborator contracts the engine talks to: query execution, rendering and transport.
//!
//! The engine never inspects a rendered payload; it only hands it from the
//! renderer to the transport together with a destination identifier.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, ProbeError};
use crate::types::Level;

/// One result row returned by the query engine, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque, transport-ready message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(serde_json::Value);

impl Payload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Action button attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
    #[serde(default)]
    pub is_danger: bool,
}

/// Named variables handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderContext {
    pub level: Level,
    pub title: String,
    pub content: String,
    pub source: String,
    pub error_msg: Option<String>,
    pub error_code: Option<String>,
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub extra: BTreeMap<String, serde_json::Value>,
    pub links: Vec<Link>,
    pub mention_all: bool,
    /// User ids to @ individually.
    pub mentions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RenderContext {
    pub fn new(level: Level, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            content: content.into(),
            source: String::new(),
            error_msg: None,
            error_code: None,
            metrics: BTreeMap::new(),
            extra: BTreeMap::new(),
            links: Vec::new(),
            mention_all: false,
            mentions: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Turns a level plus variables into a transport payload.
pub trait Renderer: Send + Sync {
    /// Render with the named template, or the level's default when `template` is `None`.
    fn render(&self, template: Option<&str>, context: &RenderContext) -> Result<Payload, ProbeError>;
}

/// Blocking outbound send.
pub trait Transport: Send + Sync {
    fn send(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError>;

    /// Human-readable name for this transport (e.g., "feishu-webhook").
    fn name(&self) -> &str;
}

/// Non-blocking outbound send.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn send(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError>;

    fn name(&self) -> &str;
}

/// Executes probe query text against a data engine.
pub trait QueryEngine: Send + Sync {
    fn query(&self, sql: &str) -> Result<Vec<Row>, ProbeError>;
}
