use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::traffic::{probe, TrafficError};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub receiver: ReceiverConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub host: String,
    pub port: u16,
    pub packet_count: u64,
    pub packet_size: usize,
    /// Packets per second, 0 sends without pausing.
    pub frequency: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind_addr: String,
    pub port: u16,
    pub stop_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub refresh_rate_ms: u64,
    pub log_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9999,
            packet_count: 10,
            packet_size: 1024,
            frequency: 5,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 9999,
            stop_grace_ms: 3000,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 250,
            log_capacity: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), TrafficError> {
        if self.host.trim().is_empty() {
            return Err(TrafficError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(TrafficError::InvalidConfig("destination port must not be 0".to_string()));
        }
        probe::payload_len(self.packet_size)?;
        Ok(())
    }

    /// Pause after each packet. Whole milliseconds, so rates above 1000/s
    /// send back to back.
    pub fn send_interval(&self) -> Option<Duration> {
        if self.frequency == 0 {
            None
        } else {
            Some(Duration::from_millis(1000 / self.frequency as u64))
        }
    }
}

impl ReceiverConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Missing path means defaults; a path that fails to load is an error.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Cannot serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Cannot write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_form_defaults() {
        let config = Config::default();
        assert_eq!(config.generator.host, "localhost");
        assert_eq!(config.generator.port, 9999);
        assert_eq!(config.generator.packet_count, 10);
        assert_eq!(config.generator.packet_size, 1024);
        assert_eq!(config.generator.frequency, 5);
        assert_eq!(config.receiver.port, 9999);
        assert_eq!(config.receiver.stop_grace(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [generator]
            host = "10.0.0.2"
            frequency = 100

            [logging]
            file = "traffic.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.generator.host, "10.0.0.2");
        assert_eq!(config.generator.frequency, 100);
        assert_eq!(config.generator.packet_count, 10);
        assert_eq!(config.receiver, ReceiverConfig::default());
        assert_eq!(config.logging.file, Some(PathBuf::from("traffic.log")));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("traffic-analyzer-{}.toml", std::process::id()));
        let mut config = Config::default();
        config.receiver.port = 5005;

        config.save_to_file(&path).unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_send_interval() {
        let mut generator = GeneratorConfig::default();
        assert_eq!(generator.send_interval(), Some(Duration::from_millis(200)));

        generator.frequency = 3;
        assert_eq!(generator.send_interval(), Some(Duration::from_millis(333)));

        generator.frequency = 0;
        assert_eq!(generator.send_interval(), None);

        generator.frequency = 5000;
        assert_eq!(generator.send_interval(), Some(Duration::ZERO));
    }

    #[test]
    fn test_validate() {
        let mut generator = GeneratorConfig::default();
        assert!(generator.validate().is_ok());

        generator.host = "  ".to_string();
        assert!(generator.validate().is_err());

        generator = GeneratorConfig { port: 0, ..GeneratorConfig::default() };
        assert!(generator.validate().is_err());

        generator = GeneratorConfig { packet_size: 70_000, ..GeneratorConfig::default() };
        assert!(matches!(generator.validate(), Err(TrafficError::PayloadTooLarge(70_000, _))));
    }
}
