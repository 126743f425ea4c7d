use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PanelError;

use super::topic_codec::normalize_base;

/// Broker connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub base_topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Capacity of the transport's request channel
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            base_topic: "test/topic".to_string(),
            client_id: format!("mqttpanel-{}", std::process::id()),
            keep_alive_secs: 30,
            username: None,
            password: None,
            request_capacity: 100,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), PanelError> {
        SessionTarget::new(&self.host, self.port, &self.base_topic)?;
        if self.client_id.trim().is_empty() {
            return Err(PanelError::ConfigError("client id must not be empty".into()));
        }
        if self.keep_alive_secs < 5 {
            return Err(PanelError::ConfigError(format!(
                "keep alive must be at least 5 seconds, got {}",
                self.keep_alive_secs
            )));
        }
        if self.request_capacity == 0 {
            return Err(PanelError::ConfigError(
                "request capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Validated connect request: where to connect and which base topic to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub base_topic: String,
}

impl SessionTarget {
    pub fn new(host: &str, port: u16, base_topic: &str) -> Result<Self, PanelError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(PanelError::ConfigError("broker host must not be empty".into()));
        }
        if port == 0 {
            return Err(PanelError::ConfigError("broker port must not be 0".into()));
        }

        let base_topic = normalize_base(base_topic);
        if base_topic.is_empty() {
            return Err(PanelError::ConfigError("base topic must not be empty".into()));
        }
        if base_topic.contains(['+', '#']) {
            return Err(PanelError::ConfigError(format!(
                "base topic {:?} must not contain wildcards",
                base_topic
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            base_topic: base_topic.to_string(),
        })
    }

    /// Subscription filter covering every panel topic
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.base_topic)
    }
}

/// Automatic reconnect after transport failures
///
/// `max_attempts = 0` keeps the operator-driven behaviour: a failed session stays
/// failed until the next explicit connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (1-based), or None once attempts are used up
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Some(Duration::from_millis(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_target_strips_trailing_separator() {
        let target = SessionTarget::new(" localhost ", 1883, "home/panel/").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.base_topic, "home/panel");
        assert_eq!(target.subscription_filter(), "home/panel/#");
    }

    #[test]
    fn session_target_rejects_invalid_input() {
        assert!(matches!(
            SessionTarget::new("", 1883, "a"),
            Err(PanelError::ConfigError(_))
        ));
        assert!(matches!(
            SessionTarget::new("host", 0, "a"),
            Err(PanelError::ConfigError(_))
        ));
        assert!(matches!(
            SessionTarget::new("host", 1883, "/"),
            Err(PanelError::ConfigError(_))
        ));
        assert!(matches!(
            SessionTarget::new("host", 1883, "a/+/b"),
            Err(PanelError::ConfigError(_))
        ));
        assert!(matches!(
            SessionTarget::new("host", 1883, "a/#"),
            Err(PanelError::ConfigError(_))
        ));
    }

    #[test]
    fn broker_defaults_are_valid() {
        assert!(BrokerConfig::default().validate().is_ok());

        let short_keep_alive = BrokerConfig {
            keep_alive_secs: 1,
            ..BrokerConfig::default()
        };
        assert!(short_keep_alive.validate().is_err());
    }

    #[test]
    fn reconnect_disabled_by_default() {
        assert_eq!(ReconnectPolicy::default().backoff(1), None);
    }

    #[test]
    fn reconnect_backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
        };
        assert_eq!(policy.backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.backoff(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.backoff(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.backoff(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.backoff(6), None);
    }
}
