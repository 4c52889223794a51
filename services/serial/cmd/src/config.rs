//! Configuration handling for the serial keeper.
//!
//! Reads the `serial:` section of a YAML config file, then applies
//! environment variable overrides on top.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use serial_session::{TelemetryFormat, DEFAULT_RECONNECT_TIMEOUT};

/// Where telemetry records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryMode {
    /// Through the log
    Log,
    /// JSON lines on stdout
    Json,
    /// Discarded
    Off,
}

impl TelemetryMode {
    /// Exporter format, none when telemetry is off
    pub fn format(self) -> Option<TelemetryFormat> {
        match self {
            TelemetryMode::Log => Some(TelemetryFormat::Log),
            TelemetryMode::Json => Some(TelemetryFormat::Json),
            TelemetryMode::Off => None,
        }
    }
}

impl FromStr for TelemetryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(TelemetryMode::Log),
            "json" => Ok(TelemetryMode::Json),
            "off" | "none" => Ok(TelemetryMode::Off),
            other => anyhow::bail!("unknown telemetry mode: {}", other),
        }
    }
}

/// Serial keeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Peer to connect to on startup
    pub address: Option<String>,
    /// Longest a reconnect streak may run; zero means forever
    pub reconnect_timeout: Duration,
    /// Telemetry export mode
    pub telemetry: TelemetryMode,
    /// Attach the console observer on startup
    pub attach_on_start: bool,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            address: None,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            telemetry: TelemetryMode::Log,
            attach_on_start: true,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    serial: Option<SerialSection>,
}

#[derive(Debug, Deserialize)]
struct SerialSection {
    address: Option<String>,
    reconnect_timeout: Option<String>,
    telemetry: Option<TelemetryMode>,
    attach_on_start: Option<bool>,
}

impl KeeperConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config)?;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_environment_overrides()?;

        info!(
            "Final keeper configuration: address={:?}, reconnect_timeout={}, telemetry={:?}",
            config.address,
            humantime::format_duration(config.reconnect_timeout),
            config.telemetry
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) -> Result<()> {
        let Some(serial) = root_config.serial else {
            return Ok(());
        };

        if let Some(address) = serial.address {
            self.address = Some(address);
        }
        if let Some(timeout) = serial.reconnect_timeout {
            self.reconnect_timeout = humantime::parse_duration(&timeout)?;
        }
        if let Some(telemetry) = serial.telemetry {
            self.telemetry = telemetry;
        }
        if let Some(attach) = serial.attach_on_start {
            self.attach_on_start = attach;
        }

        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(address) = lookup("SERIAL_KEEPER_ADDRESS") {
            info!("Address overridden by environment: {}", address);
            self.address = Some(address);
        }

        if let Some(timeout) = lookup("SERIAL_KEEPER_RECONNECT_TIMEOUT") {
            self.reconnect_timeout = humantime::parse_duration(&timeout)?;
            info!("Reconnect timeout overridden by environment: {}", timeout);
        }

        if let Some(telemetry) = lookup("SERIAL_KEEPER_TELEMETRY") {
            self.telemetry = telemetry.parse()?;
            info!("Telemetry overridden by environment: {:?}", self.telemetry);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = KeeperConfig::default();
        assert_eq!(config.address, None);
        assert_eq!(config.reconnect_timeout, Duration::from_secs(300));
        assert_eq!(config.telemetry, TelemetryMode::Log);
        assert!(config.attach_on_start);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
serial:
  address: 127.0.0.1:7000
  reconnect_timeout: 90s
  telemetry: json
  attach_on_start: false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = KeeperConfig::default();
        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        config
            .apply_root_config(serde_yaml::from_str(&content).unwrap())
            .unwrap();

        assert_eq!(config.address.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(config.reconnect_timeout, Duration::from_secs(90));
        assert_eq!(config.telemetry, TelemetryMode::Json);
        assert!(!config.attach_on_start);
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"serial: [not, a, map").unwrap();

        let config = KeeperConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.reconnect_timeout, DEFAULT_RECONNECT_TIMEOUT);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SERIAL_KEEPER_ADDRESS", "10.0.0.5:4000"),
            ("SERIAL_KEEPER_RECONNECT_TIMEOUT", "0s"),
            ("SERIAL_KEEPER_TELEMETRY", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = KeeperConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.address.as_deref(), Some("10.0.0.5:4000"));
        assert_eq!(config.reconnect_timeout, Duration::ZERO);
        assert_eq!(config.telemetry.format(), None);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = KeeperConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "SERIAL_KEEPER_TELEMETRY").then(|| "syslog".to_string())
        });
        assert!(result.is_err());
    }
}
