use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Delay growth between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows by the base delay on every retry (d, 2d, 3d, ...).
    Linear,
}

impl FromStr for RetryBackoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(RetryBackoff::Fixed),
            "linear" => Ok(RetryBackoff::Linear),
            other => Err(format!("unknown retry backoff: {}", other)),
        }
    }
}

/// What the rate-limit window is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitScope {
    Fingerprint,
    Channel,
}

impl FromStr for RateLimitScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fingerprint" => Ok(RateLimitScope::Fingerprint),
            "channel" => Ok(RateLimitScope::Channel),
            other => Err(format!("unknown rate limit scope: {}", other)),
        }
    }
}

/// Engine configuration, normally loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Source label attached to every rendered message
    pub source: String,

    /// Whether the dedup gate is active (default: true)
    pub dedup_enabled: bool,

    /// Dedup window (default: 300s)
    pub dedup_ttl: Duration,

    /// CRITICAL notifications skip the dedup gate (default: false)
    pub critical_bypass_dedup: bool,

    /// Whether the rate-limit gate is active (default: true)
    pub rate_limit_enabled: bool,

    /// Trailing rate-limit window (default: 60s)
    pub rate_limit_window: Duration,

    /// Maximum admitted sends per key inside the window (default: 10)
    pub rate_limit_max: u32,

    pub rate_limit_scope: RateLimitScope,

    /// Total delivery attempts, including the first (default: 3)
    pub retry_max_attempts: u32,

    /// Base delay between attempts (default: 1s)
    pub retry_delay: Duration,

    pub retry_backoff: RetryBackoff,

    /// Per-attempt HTTP timeout handed to the transport (default: 10s)
    pub request_timeout: Duration,

    /// ERROR results interrupt the pipeline; CRITICAL always does while enabled (default: true)
    pub interrupt_on_error: bool,

    /// Deliver SUCCESS notifications on recovery (default: true)
    pub notify_on_recovery: bool,

    /// Redis connection string; when set, gate and prior state live in Redis
    pub redis_url: Option<String>,

    /// Directory scanned for custom message templates
    pub template_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: "SQL-Probe".to_string(),
            dedup_enabled: true,
            dedup_ttl: Duration::from_secs(300),
            critical_bypass_dedup: false,
            rate_limit_enabled: true,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 10,
            rate_limit_scope: RateLimitScope::Fingerprint,
            retry_max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            retry_backoff: RetryBackoff::Fixed,
            request_timeout: Duration::from_millis(10_000),
            interrupt_on_error: true,
            notify_on_recovery: true,
            redis_url: None,
            template_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            source: std::env::var("SQL_PROBE_SOURCE").unwrap_or(defaults.source),
            dedup_enabled: env_parse("PROBE_DEDUP_ENABLED", defaults.dedup_enabled)?,
            dedup_ttl: Duration::from_secs(env_parse(
                "PROBE_DEDUP_TTL_SECONDS",
                defaults.dedup_ttl.as_secs(),
            )?),
            critical_bypass_dedup: env_parse(
                "PROBE_CRITICAL_BYPASS_DEDUP",
                defaults.critical_bypass_dedup,
            )?,
            rate_limit_enabled: env_parse("PROBE_RATE_LIMIT_ENABLED", defaults.rate_limit_enabled)?,
            rate_limit_window: Duration::from_secs(env_parse(
                "PROBE_RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window.as_secs(),
            )?),
            rate_limit_max: env_parse("PROBE_RATE_LIMIT_MAX", defaults.rate_limit_max)?,
            rate_limit_scope: env_parse("PROBE_RATE_LIMIT_SCOPE", defaults.rate_limit_scope)?,
            retry_max_attempts: env_parse("PROBE_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_delay: Duration::from_millis(env_parse(
                "PROBE_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )?),
            retry_backoff: env_parse("PROBE_RETRY_BACKOFF", defaults.retry_backoff)?,
            request_timeout: Duration::from_millis(env_parse(
                "PROBE_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )?),
            interrupt_on_error: env_parse("PROBE_INTERRUPT_ON_ERROR", defaults.interrupt_on_error)?,
            notify_on_recovery: env_parse("PROBE_NOTIFY_ON_RECOVERY", defaults.notify_on_recovery)?,
            redis_url: std::env::var("FEISHU_REDIS_URL").ok(),
            template_dir: std::env::var("FEISHU_TEMPLATE_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Read and parse an optional environment variable, falling back to `default`.
fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        Err(_) => Ok(default),
    }
}
