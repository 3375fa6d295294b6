//! Notification gate: dedup window first, then the sliding rate limit.
//!
//! The dedup entry marks a notification as sent. When the rate limit holds
//! an admitted notification back, the entry is released again, and callers
//! release it through [`NotificationGate::release`] when delivery fails, so
//! only notifications that actually went out suppress their repeats.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use probe_common::{EngineConfig, Level, ProbeError, RateLimitScope, Suppression};

use crate::clock::Clock;
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub dedup_enabled: bool,
    pub dedup_ttl: Duration,
    pub critical_bypass_dedup: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    pub rate_limit_scope: RateLimitScope,
}

impl From<&EngineConfig> for GateConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            dedup_enabled: config.dedup_enabled,
            dedup_ttl: config.dedup_ttl,
            critical_bypass_dedup: config.critical_bypass_dedup,
            rate_limit_enabled: config.rate_limit_enabled,
            rate_limit_window: config.rate_limit_window,
            rate_limit_max: config.rate_limit_max,
            rate_limit_scope: config.rate_limit_scope,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Suppress(Suppression),
}

/// Fingerprint of an alert: the caller's dedup key when given, otherwise a
/// stable hash of name and info.
pub fn fingerprint(dedup_key: Option<&str>, alert_name: &str, alert_info: &str) -> String {
    if let Some(key) = dedup_key
        && !key.is_empty()
    {
        return key.to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(alert_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(alert_info.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

pub struct NotificationGate {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: GateConfig,
}

impl NotificationGate {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, config: GateConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether a notification for `fingerprint` on `channel` goes out.
    pub fn evaluate(
        &self,
        fingerprint: &str,
        channel: &str,
        level: Level,
    ) -> Result<GateDecision, ProbeError> {
        let now = self.clock.now();

        let dedup_checked = self.checks_dedup(level);
        if dedup_checked
            && !self
                .store
                .check_and_set_dedup(fingerprint, self.config.dedup_ttl, now)?
        {
            tracing::debug!(
                fingerprint,
                ttl_secs = self.config.dedup_ttl.as_secs(),
                "Notification suppressed: duplicate inside dedup window"
            );
            return Ok(GateDecision::Suppress(Suppression::Duplicate));
        }

        if self.config.rate_limit_enabled {
            let key = match self.config.rate_limit_scope {
                RateLimitScope::Fingerprint => fingerprint.to_string(),
                RateLimitScope::Channel => format!("channel:{}", channel),
            };
            if !self.store.check_and_record_rate(
                &key,
                self.config.rate_limit_window,
                self.config.rate_limit_max,
                now,
            )? {
                tracing::debug!(
                    key = %key,
                    max = self.config.rate_limit_max,
                    window_secs = self.config.rate_limit_window.as_secs(),
                    "Notification suppressed: rate limit reached"
                );
                if dedup_checked {
                    self.store.clear_dedup(fingerprint)?;
                }
                return Ok(GateDecision::Suppress(Suppression::RateLimited));
            }
        }

        Ok(GateDecision::Admit)
    }

    /// Forget the dedup entry of an admitted notification that was not
    /// delivered, so the next occurrence is admitted again.
    pub fn release(&self, fingerprint: &str, level: Level) -> Result<(), ProbeError> {
        if !self.checks_dedup(level) {
            return Ok(());
        }
        tracing::debug!(fingerprint, "Dedup entry released after failed delivery");
        self.store.clear_dedup(fingerprint)
    }

    /// CRITICAL skips the dedup gate when bypass is on, and never owns an entry.
    fn checks_dedup(&self, level: Level) -> bool {
        let bypass = self.config.critical_bypass_dedup && level == Level::Critical;
        self.config.dedup_enabled && !bypass
    }
}
