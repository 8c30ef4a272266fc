//! # Configuration Management
//!
//! Centralized configuration for Mi IO device communication.
//!
//! The host layer supplies a device address, its token, its device id and a
//! receive timeout. Everything else (queue behaviour, logging) has defaults.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`

use crate::error::{MiioError, Result};
use crate::utils::crypto::parse_token;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// UDP port every Mi IO device listens on
pub const MIIO_PORT: u16 = 54321;

/// Magic bytes opening every Mi IO frame
pub const MAGIC_BYTES: [u8; 2] = [0x21, 0x31];

/// Fixed header length of a Mi IO frame
pub const HEADER_SIZE: usize = 32;

/// Largest datagram we will accept from a device
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Consecutive exchange failures tolerated before a forced ping
pub const MAX_ERRORS: u32 = 3;

/// Handshake frames sent by a single ping
pub const PING_ATTEMPTS: u32 = 3;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MiioConfig {
    /// Device endpoint configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Dispatcher and liveness configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MiioConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| MiioError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| MiioError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| MiioError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MIIO_HOST") {
            config.device.host = host;
        }

        if let Ok(token) = std::env::var("MIIO_TOKEN") {
            config.device.token = token;
        }

        if let Ok(device_id) = std::env::var("MIIO_DEVICE_ID") {
            let parsed = device_id.parse::<u32>().map_err(|e| {
                MiioError::ConfigError(format!("Invalid MIIO_DEVICE_ID '{device_id}': {e}"))
            })?;
            config.device.device_id = Some(parsed);
        }

        if let Ok(timeout) = std::env::var("MIIO_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.device.timeout = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.dispatcher.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MiioError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Device endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device IP address
    pub host: String,

    /// UDP port (fixed by the protocol, configurable for tests)
    pub port: u16,

    /// 32 hex characters, or empty when the token is learned from the handshake
    pub token: String,

    /// Device id; left unset to learn it from the handshake reply
    #[serde(default)]
    pub device_id: Option<u32>,

    /// Receive timeout for one exchange
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::from("192.168.1.2"),
            port: MIIO_PORT,
            token: String::from("00000000000000000000000000000000"),
            device_id: None,
            timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Device host cannot be empty".to_string());
        } else if self.host.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "Invalid device host: '{}' (expected an IP address like '192.168.1.2')",
                self.host
            ));
        }

        if self.port == 0 {
            errors.push("Device port cannot be 0".to_string());
        }

        if let Err(e) = parse_token(&self.token) {
            errors.push(format!("Invalid token: {e}"));
        }

        if self.timeout.as_millis() < 100 {
            errors.push("Receive timeout too short (minimum: 100ms)".to_string());
        } else if self.timeout.as_secs() > 60 {
            errors.push("Receive timeout too long (maximum: 60s)".to_string());
        }

        errors
    }

    /// Resolve the configured host and port into a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip = self.host.parse::<IpAddr>().map_err(|e| {
            MiioError::ConfigError(format!("Invalid device host '{}': {e}", self.host))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Dispatcher and liveness configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Consecutive failures before a forced ping
    pub max_errors: u32,

    /// Handshake frames per ping
    pub ping_attempts: u32,

    /// Whether `enqueue` may trigger a ping while the device is not known reachable
    pub ping_on_enqueue: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_errors: MAX_ERRORS,
            ping_attempts: PING_ATTEMPTS,
            ping_on_enqueue: true,
        }
    }
}

impl DispatcherConfig {
    /// Validate dispatcher configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_errors == 0 {
            errors.push("Max errors must be greater than 0".to_string());
        }

        if self.ping_attempts == 0 {
            errors.push("Ping attempts must be greater than 0".to_string());
        } else if self.ping_attempts > 10 {
            errors.push(format!(
                "Ping attempts too high: {} (maximum: 10)",
                self.ping_attempts
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("miio-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
