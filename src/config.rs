use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::PanelError;
use crate::mqtt::config::{BrokerConfig, ReconnectPolicy};
use crate::panel::event_log::DEFAULT_LOG_CAPACITY;

const CONFIG_DIR: &str = "mqttpanel";
const CONFIG_FILE: &str = "config.toml";

/// Application-side tuning of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub log_capacity: usize,
    /// Quiet interval before a dimmer change is published, 0 disables coalescing
    pub dimmer_debounce_ms: u64,
    /// Upper bound for one blocking wait on the dispatch queue
    pub drain_wait_ms: u64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            dimmer_debounce_ms: 0,
            drain_wait_ms: 20,
        }
    }
}

impl PanelSettings {
    pub fn dimmer_debounce(&self) -> Duration {
        Duration::from_millis(self.dimmer_debounce_ms)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms)
    }
}

/// Everything read from `config.toml`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub broker: BrokerConfig,
    pub panel: PanelSettings,
    pub reconnect: ReconnectPolicy,
}

impl PanelConfig {
    pub fn validate(&self) -> Result<(), PanelError> {
        self.broker.validate()?;
        if self.panel.log_capacity == 0 {
            return Err(PanelError::ConfigError(
                "log capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// `<config dir>/mqttpanel/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: PanelConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        config
            .validate()
            .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Loads `path`, writing the defaults there first if it does not exist yet
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;

        if !exists {
            info!("No config at {}, writing defaults", path.display());
            let config = PanelConfig::default();
            config.save(path).await?;
            return Ok(config);
        }
        Self::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("mqttpanel-test-{}-{}", std::process::id(), name))
            .join(CONFIG_FILE)
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: PanelConfig = toml::from_str(
            r#"
            [broker]
            host = "10.0.0.2"

            [panel]
            dimmer_debounce_ms = 150
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.host, "10.0.0.2");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.base_topic, "test/topic");
        assert_eq!(config.panel.dimmer_debounce(), Duration::from_millis(150));
        assert_eq!(config.panel.log_capacity, DEFAULT_LOG_CAPACITY);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_log_capacity() {
        let mut config = PanelConfig::default();
        config.panel.log_capacity = 0;
        assert!(matches!(config.validate(), Err(PanelError::ConfigError(_))));
    }

    #[test]
    fn default_path_ends_in_app_dir() {
        let path = PanelConfig::default_path();
        assert!(path.ends_with("mqttpanel/config.toml"));
    }

    #[tokio::test]
    async fn load_or_create_writes_defaults_then_reads_them_back() {
        let path = scratch_path("create");
        let _ = tokio::fs::remove_file(&path).await;

        let created = PanelConfig::load_or_create(&path).await.unwrap();
        assert!(tokio::fs::try_exists(&path).await.unwrap());

        let mut edited = created.clone();
        edited.broker.base_topic = "home/panel".into();
        edited.save(&path).await.unwrap();

        let loaded = PanelConfig::load_or_create(&path).await.unwrap();
        assert_eq!(loaded.broker.base_topic, "home/panel");

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn invalid_file_is_reported() {
        let path = scratch_path("invalid");
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, "[broker]\nbase_topic = \"a/#\"\n")
            .await
            .unwrap();

        let err = PanelConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}
