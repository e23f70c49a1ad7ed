//! Engine configuration with defaults.

use crate::ServiceKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Serde helper: `Duration` as `u64` milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize `Duration` as `u64` milliseconds.
    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (dur.as_millis() as u64).serialize(s)
    }

    /// Deserialize `u64` milliseconds into `Duration`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

fn default_announce_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_subscription_grace() -> Duration {
    Duration::from_secs(5)
}

/// Static configuration for one engine instance.
///
/// Loaded from a TOML file or built in code; every field has a usable
/// default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often offered services are re-announced and searched services
    /// re-queried. Remote liveness expires at 3x this interval.
    #[serde(with = "duration_ms", rename = "announce_interval_ms")]
    pub announce_interval: Duration,

    /// Default deadline for outgoing requests.
    #[serde(with = "duration_ms", rename = "request_timeout_ms")]
    pub request_timeout: Duration,

    /// How long a subscription to a not-yet-available service is kept
    /// pending before it expires.
    #[serde(with = "duration_ms", rename = "subscription_grace_ms")]
    pub subscription_grace: Duration,

    /// Client id stamped on outgoing requests. Picked at random when
    /// absent.
    pub client_id: Option<u16>,

    /// Human-readable service names mapped to their keys.
    pub services: HashMap<String, ServiceKey>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            announce_interval: default_announce_interval(),
            request_timeout: default_request_timeout(),
            subscription_grace: default_subscription_grace(),
            client_id: None,
            services: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Look up a service key by its configured name.
    pub fn resolve(&self, name: &str) -> Option<ServiceKey> {
        self.services.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.announce_interval, Duration::from_secs(1));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.subscription_grace, Duration::from_secs(5));
        assert!(config.client_id.is_none());
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            announce_interval_ms = 250
            request_timeout_ms = 2000

            [services]
            demo = { service = 0x1234, instance = 0x5678 }
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.announce_interval, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        // Unspecified fields fall back to defaults
        assert_eq!(config.subscription_grace, Duration::from_secs(5));
        assert_eq!(
            config.resolve("demo"),
            Some(ServiceKey::new(0x1234, 0x5678))
        );
        assert_eq!(config.resolve("missing"), None);
    }
}
