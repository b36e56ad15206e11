//! Application settings

use crate::core::protocol::framing::FramingPolicy;
use crate::core::registry::{CommandRegistry, MethodLimits};
use crate::core::transport::{
    SerialServerConfig, TcpServerConfig, DEFAULT_BAUD_RATE, DEFAULT_MAX_CLIENTS, DEFAULT_PORT,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// TCP listener
    pub tcp: TcpSettings,
    /// Serial transport
    pub serial: SerialSettings,
    /// Per-method bounds
    pub limits: MethodLimits,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Shutdown settings
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// Load config from `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Check ranges the TOML schema cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp.port == 0 {
            return Err(ConfigError::Invalid("tcp.port must be 1-65535".into()));
        }
        if self.tcp.max_clients == 0 {
            return Err(ConfigError::Invalid("tcp.max_clients must be at least 1".into()));
        }
        if self.tcp.liveness_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tcp.liveness_interval_ms must be at least 1".into(),
            ));
        }
        if self.serial.baud_rate != DEFAULT_BAUD_RATE {
            return Err(ConfigError::Invalid(format!(
                "serial.baud_rate must be {DEFAULT_BAUD_RATE}"
            )));
        }
        if self.serial.enabled && self.serial.port.is_none() {
            return Err(ConfigError::Invalid(
                "serial.port is required when serial is enabled".into(),
            ));
        }
        CommandRegistry::with_limits(&self.limits)
            .map_err(|e| ConfigError::Invalid(format!("limits: {e}")))?;
        Ok(())
    }
}

/// TCP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    /// Start the listener
    pub enabled: bool,
    /// Listening port
    pub port: u16,
    /// Address to bind
    pub bind_address: IpAddr,
    /// Concurrent session cap
    pub max_clients: usize,
    /// Dead session sweep period in milliseconds
    pub liveness_interval_ms: u64,
    /// Request framing
    pub framing: FramingPolicy,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_clients: DEFAULT_MAX_CLIENTS,
            liveness_interval_ms: 1000,
            framing: FramingPolicy::default(),
        }
    }
}

impl TcpSettings {
    /// Listener configuration
    pub fn server_config(&self) -> TcpServerConfig {
        TcpServerConfig::new(self.port)
            .bind_address(self.bind_address)
            .max_clients(self.max_clients)
            .liveness_interval(Duration::from_millis(self.liveness_interval_ms))
            .framing(self.framing)
    }
}

/// Serial transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Open the port
    pub enabled: bool,
    /// Port name
    pub port: Option<String>,
    /// Baud rate, only 115200 is accepted
    pub baud_rate: u32,
    /// Request framing
    pub framing: FramingPolicy,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            framing: FramingPolicy::default(),
        }
    }
}

impl SerialSettings {
    /// Transport configuration, if a port is selected
    pub fn server_config(&self) -> Option<SerialServerConfig> {
        self.port.as_deref().map(|port| {
            let mut config = SerialServerConfig::new(port).framing(self.framing);
            config.baud_rate = self.baud_rate;
            config
        })
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "netremote_core=debug"
    pub level: String,
    /// Directory for daily log files; console only when unset
    pub directory: Option<PathBuf>,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

/// Shutdown settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for a transport task after cancelling it
    pub join_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 1000,
        }
    }
}

impl ShutdownConfig {
    /// Join timeout as a duration
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Bounds;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.tcp.enabled);
        assert_eq!(config.tcp.port, 3382);
        assert_eq!(config.tcp.max_clients, 4);
        assert!(!config.serial.enabled);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.shutdown.join_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.tcp.port = 4000;
        config.serial.port = Some("/dev/ttyUSB0".to_string());
        config.limits.audio_gain = Bounds::new(0, 100);
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tcp]\nport = 5000\n\n[limits.audio_gain]\nmin = 0\nmax = 80\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.tcp.port, 5000);
        assert_eq!(config.tcp.max_clients, 4);
        assert_eq!(config.limits.audio_gain, Bounds::new(0, 80));
        assert_eq!(config.limits.squelch_threshold, Bounds::new(0, 100));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.tcp.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.tcp.max_clients = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.serial.baud_rate = 9600;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.serial.enabled = true;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.filter_order = Bounds::new(100, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[serial]\nbaud_rate = 9600\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, "[tcp\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_server_configs() {
        let mut config = AppConfig::default();
        let tcp = config.tcp.server_config();
        assert_eq!(tcp.port, 3382);
        assert_eq!(tcp.liveness_interval, Duration::from_secs(1));

        assert!(config.serial.server_config().is_none());
        config.serial.port = Some("COM3".into());
        assert_eq!(config.serial.server_config().unwrap().port, "COM3");
    }
}
