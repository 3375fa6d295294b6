//! Channel router: logical channel name to destination identifier.
//!
//! Resolution order:
//! 1. explicit override passed at call time
//! 2. destination configured for the channel (route table, then secrets)
//! 3. process-wide default destination
//!
//! A channel `"ops"` is looked up under the secret key `webhook-ops`; the
//! default channel under `webhook-default`.

use std::collections::HashMap;
use std::sync::Arc;

use probe_common::ProbeError;

pub const DEFAULT_CHANNEL: &str = "default";

/// Read-only secret lookup.
pub trait SecretSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Secrets from environment variables: `webhook-ops` is read from
/// `FEISHU_WEBHOOK_OPS`, `webhook-default` from `FEISHU_WEBHOOK`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl EnvSecrets {
    pub fn env_key(secret_key: &str) -> String {
        match secret_key.strip_prefix("webhook-") {
            Some(DEFAULT_CHANNEL) => "FEISHU_WEBHOOK".to_string(),
            Some(channel) => format!("FEISHU_WEBHOOK_{}", channel.to_ascii_uppercase().replace('-', "_")),
            None => secret_key.to_ascii_uppercase().replace('-', "_"),
        }
    }
}

impl SecretSource for EnvSecrets {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::env_key(key))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Default, Clone)]
pub struct MapSecrets(HashMap<String, String>);

impl MapSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl SecretSource for MapSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// A resolved channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub channel: String,
    pub destination: String,
}

#[derive(Default)]
pub struct ChannelRouter {
    routes: HashMap<String, String>,
    secrets: Option<Arc<dyn SecretSource>>,
    default_destination: Option<String>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, channel: impl Into<String>, destination: impl Into<String>) -> Self {
        self.routes.insert(channel.into(), destination.into());
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_default(mut self, destination: impl Into<String>) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    fn configured(&self, channel: &str) -> Option<String> {
        if let Some(destination) = self.routes.get(channel) {
            return Some(destination.clone());
        }
        self.secrets
            .as_ref()
            .and_then(|s| s.get(&format!("webhook-{}", channel)))
    }

    fn default_destination(&self) -> Option<String> {
        self.default_destination
            .clone()
            .or_else(|| self.configured(DEFAULT_CHANNEL))
    }

    /// Resolve `channel` (or the default channel) to a destination.
    pub fn resolve(
        &self,
        channel: Option<&str>,
        override_destination: Option<&str>,
    ) -> Result<Route, ProbeError> {
        let channel = channel
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CHANNEL);

        if let Some(destination) = override_destination.filter(|d| !d.trim().is_empty()) {
            return Ok(Route {
                channel: channel.to_string(),
                destination: destination.to_string(),
            });
        }

        if let Some(destination) = self.configured(channel) {
            return Ok(Route {
                channel: channel.to_string(),
                destination,
            });
        }

        match self.default_destination() {
            Some(destination) => {
                if channel != DEFAULT_CHANNEL {
                    tracing::debug!(channel, "No destination for channel, using default");
                }
                Ok(Route {
                    channel: channel.to_string(),
                    destination,
                })
            }
            None => Err(ProbeError::Config(format!(
                "no destination configured for channel '{}' and no default",
                channel
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_mapping() {
        assert_eq!(EnvSecrets::env_key("webhook-default"), "FEISHU_WEBHOOK");
        assert_eq!(EnvSecrets::env_key("webhook-ops"), "FEISHU_WEBHOOK_OPS");
        assert_eq!(EnvSecrets::env_key("webhook-data-team"), "FEISHU_WEBHOOK_DATA_TEAM");
    }

    #[test]
    fn test_override_wins() {
        let router = ChannelRouter::new()
            .with_route("ops", "https://hook/ops")
            .with_default("https://hook/default");
        let route = router.resolve(Some("ops"), Some("https://hook/explicit")).unwrap();
        assert_eq!(route.destination, "https://hook/explicit");
        assert_eq!(route.channel, "ops");
    }

    #[test]
    fn test_configured_then_default() {
        let secrets = MapSecrets::new()
            .with("webhook-data", "https://hook/data")
            .with("webhook-default", "https://hook/default");
        let router = ChannelRouter::new()
            .with_route("ops", "https://hook/ops")
            .with_secrets(Arc::new(secrets));

        assert_eq!(router.resolve(Some("ops"), None).unwrap().destination, "https://hook/ops");
        assert_eq!(router.resolve(Some("data"), None).unwrap().destination, "https://hook/data");
        assert_eq!(router.resolve(Some("other"), None).unwrap().destination, "https://hook/default");
        assert_eq!(router.resolve(None, None).unwrap().destination, "https://hook/default");
    }

    #[test]
    fn test_unknown_channel_without_default_is_config_error() {
        let router = ChannelRouter::new().with_route("ops", "https://hook/ops");
        let err = router.resolve(Some("nope"), None).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
        assert!(router.resolve(None, None).is_err());
    }
}
