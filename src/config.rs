use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// 0 waits forever.
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    pub lifetime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageConfig {
    pub native_function: String,
    pub event_name: String,
    pub greeting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    pub vendor: String,
    pub plugin_name: String,
    pub plugin_version: String,
    pub event_delay_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    pub console_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { lifetime_secs: 30 }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            native_function: "sayHello".to_string(),
            event_name: "exampleEvent".to_string(),
            greeting: "Test message".to_string(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            vendor: "COMPANY".to_string(),
            plugin_name: "PRODUCT".to_string(),
            plugin_version: "1.0.0".to_string(),
            event_delay_secs: 5,
            resource_root: None,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
        }
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?
            .join("webview-shell");

        fs::create_dir_all(&config_dir)?;
        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load_or_default() -> Result<Self> {
        match Self::load() {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("Using default configuration: {:#}", e);
                let config = Self::default();
                config.save()?;
                Ok(config)
            }
        }
    }

    /// `None` means native calls wait forever.
    pub fn call_timeout(&self) -> Option<Duration> {
        match self.bridge.call_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn notification_lifetime(&self) -> Duration {
        Duration::from_secs(self.notifications.lifetime_secs)
    }

    pub fn event_delay(&self) -> Duration {
        Duration::from_secs(self.host.event_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.notification_lifetime(), Duration::from_secs(30));
        assert_eq!(config.event_delay(), Duration::from_secs(5));
        assert_eq!(config.page.event_name, "exampleEvent");
    }

    #[test]
    fn zero_timeout_waits_forever() {
        let mut config = Config::default();
        config.bridge.call_timeout_ms = 0;
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.page.greeting = "Hi from the page".to_string();
        config.host.resource_root = Some(PathBuf::from("/opt/page"));
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[notifications]\nlifetime_secs = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.notification_lifetime(), Duration::from_secs(5));
        assert_eq!(config.bridge, BridgeConfig::default());
        assert_eq!(config.host, HostConfig::default());
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not = [toml").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
