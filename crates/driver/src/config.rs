//! Driver configuration management

use crate::session::{Session, Timeouts};
use anyhow::{Context, Result, anyhow};
use protocol::{CanBus, ControlRequest, SafetyMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Settings pushed to the adapter right after it is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Serial number to open; empty selects the first available adapter
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub safety_mode: SafetyMode,
    #[serde(default)]
    pub can_loopback: bool,
    /// Per-bus bit rates
    #[serde(default)]
    pub can_speeds: Vec<CanSpeed>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            serial: String::new(),
            safety_mode: SafetyMode::NoOutput,
            can_loopback: false,
            can_speeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanSpeed {
    pub bus: CanBus,
    pub kbps: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "TimeoutSettings::default_control_ms")]
    pub control_ms: u64,
    #[serde(default = "TimeoutSettings::default_bulk_write_ms")]
    pub bulk_write_ms: u64,
    #[serde(default = "TimeoutSettings::default_bulk_read_ms")]
    pub bulk_read_ms: u64,
    #[serde(default = "TimeoutSettings::default_poll_ms")]
    pub poll_ms: u64,
}

impl TimeoutSettings {
    fn default_control_ms() -> u64 {
        5000
    }

    fn default_bulk_write_ms() -> u64 {
        5000
    }

    fn default_bulk_read_ms() -> u64 {
        100
    }

    fn default_poll_ms() -> u64 {
        20
    }

    /// Session timeouts described by these settings
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            control: Duration::from_millis(self.control_ms),
            bulk_write: Duration::from_millis(self.bulk_write_ms),
            bulk_read: Duration::from_millis(self.bulk_read_ms),
            poll: Duration::from_millis(self.poll_ms),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            control_ms: Self::default_control_ms(),
            bulk_write_ms: Self::default_bulk_write_ms(),
            bulk_read_ms: Self::default_bulk_read_ms(),
            poll_ms: Self::default_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl DriverConfig {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).as_ref()),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    tracing::debug!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("panda-usb").join("driver.toml")
        } else {
            PathBuf::from(".config/panda-usb/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("control_ms", t.control_ms),
            ("bulk_write_ms", t.bulk_write_ms),
            ("bulk_read_ms", t.bulk_read_ms),
            ("poll_ms", t.poll_ms),
        ] {
            if value == 0 {
                return Err(anyhow!("Timeout '{}' must be greater than zero", name));
            }
        }

        for speed in &self.adapter.can_speeds {
            ControlRequest::SetCanSpeed {
                bus: speed.bus,
                kbps: speed.kbps,
            }
            .validate()
            .with_context(|| format!("Invalid CAN speed for {}", speed.bus))?;
        }

        Ok(())
    }

    /// Push the adapter settings to an open session
    pub fn apply(&self, session: &mut Session) -> common::Result<()> {
        session.set_timeouts(self.timeouts.to_timeouts());

        let mut control = session.control();
        control.set_safety_mode(self.adapter.safety_mode)?;
        control.set_can_loopback(self.adapter.can_loopback)?;
        for speed in &self.adapter.can_speeds {
            control.set_can_speed_kbps(speed.bus, speed.kbps)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.adapter.safety_mode, SafetyMode::NoOutput);
        assert!(config.adapter.serial.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = DriverConfig::default();
        config.adapter.can_speeds.push(CanSpeed {
            bus: CanBus::Can2,
            kbps: 250,
        });
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DriverConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = DriverConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = DriverConfig::default();
        config.timeouts.poll_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_bus_speed_rejected() {
        let mut config = DriverConfig::default();
        config.adapter.can_speeds.push(CanSpeed {
            bus: CanBus::Unknown,
            kbps: 500,
        });
        assert!(config.validate().is_err());
    }
}
