use serde::{Deserialize, Serialize};
use snoopreplay_core::ExhaustionPolicy;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub emulator: EmulatorConfig,
    pub status: StatusConfig,
    pub log: LogConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    pub port: u16,
    /// Hex status word sent when a command was never recorded.
    pub default_response: String,
    pub policy: ExhaustionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub port: u16,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub colors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            emulator: EmulatorConfig {
                port: 7410,
                default_response: "6F00".to_string(),
                policy: ExhaustionPolicy::Saturate,
            },
            status: StatusConfig {
                port: 7411,
                enabled: true,
            },
            log: LogConfig {
                capacity: snoopreplay_core::emulator::DEFAULT_LOG_CAPACITY,
            },
            display: DisplayConfig { colors: true },
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".snoopreplay")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn load_or_default() -> Self {
        let path = Self::config_path();
        if path.exists() {
            Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply a `section.key = value` override.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "emulator.port" => self.emulator.port = value.parse()?,
            "emulator.default_response" => {
                hex::decode(value)?;
                self.emulator.default_response = value.to_uppercase();
            }
            "emulator.policy" => {
                self.emulator.policy = value.parse().map_err(anyhow::Error::msg)?
            }
            "status.port" => self.status.port = value.parse()?,
            "status.enabled" => self.status.enabled = value.parse()?,
            "log.capacity" => self.log.capacity = value.parse()?,
            "display.colors" => self.display.colors = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Decoded bytes of the default response.
    pub fn default_response_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(hex::decode(&self.emulator.default_response)?)
    }
}
