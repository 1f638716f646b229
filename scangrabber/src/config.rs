/*!
Configuration management for the scan grabber application.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use lmd_shared::protocol::DISTANCE_CHANNEL;
use lmd_shared::SharedError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            scanner: ScannerConfig::default(),
            devices: DeviceConfig::default_pair(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        config.validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Check the values a run depends on
    pub fn validate(&self) -> lmd_shared::Result<()> {
        if self.devices.is_empty() {
            return Err(SharedError::config("at least one device must be configured"));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.id.as_str()) {
                return Err(SharedError::config(format!("duplicate device id '{}'", device.id)));
            }
            if device.port == 0 {
                return Err(SharedError::config(format!("device '{}' has port 0", device.id)));
            }
            if !device.yaw_deg.is_finite() {
                return Err(SharedError::config(format!("device '{}' has a non-finite yaw", device.id)));
            }
        }

        if self.scanner.poll_interval_ms == 0 {
            return Err(SharedError::config("poll_interval_ms must be greater than zero"));
        }
        if self.scanner.connect_timeout_ms == 0 {
            return Err(SharedError::config("connect_timeout_ms must be greater than zero"));
        }
        if self.scanner.channel_buffer_size == 0 {
            return Err(SharedError::config("channel_buffer_size must be greater than zero"));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings shared by every device session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Interval between poll ticks
    pub poll_interval_ms: u64,

    /// Upper bound on each TCP connect attempt
    pub connect_timeout_ms: u64,

    /// Settling delay after each startup command
    pub command_delay_ms: u64,

    /// Socket receive buffer size in bytes
    pub recv_buffer_size: usize,

    /// Size of each non-blocking read
    pub read_chunk_size: usize,

    /// Resynchronise when this many bytes are buffered without a telegram end
    /// (omit for an unbounded buffer)
    pub max_buffered_bytes: Option<usize>,

    /// Distance channel to decode
    pub distance_channel: String,

    /// Capacity of the point set channel to the consumer
    pub channel_buffer_size: usize,

    /// Statistics reporting interval in seconds
    pub stats_interval_seconds: u64,
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            connect_timeout_ms: 2000,
            command_delay_ms: 100,
            recv_buffer_size: 256 * 1024,
            read_chunk_size: 65535,
            max_buffered_bytes: Some(1024 * 1024),
            distance_channel: DISTANCE_CHANNEL.to_string(),
            channel_buffer_size: 1000,
            stats_interval_seconds: 10,
        }
    }
}

/// One rangefinder on the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Identifier attached to every point set from this device
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// IP address or host name
    pub address: String,

    pub port: u16,

    /// Mounting yaw relative to the shared frame, in degrees
    pub yaw_deg: f64,
}

impl DeviceConfig {
    /// `address:port` for connecting and reporting
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Front and rear units of the reference installation
    pub fn default_pair() -> Vec<Self> {
        vec![
            Self {
                id: "front".to_string(),
                name: "Front LiDAR".to_string(),
                address: "195.37.48.222".to_string(),
                port: 2111,
                yaw_deg: 0.0,
            },
            Self {
                id: "rear".to_string(),
                name: "Rear LiDAR".to_string(),
                address: "195.37.48.223".to_string(),
                port: 2111,
                yaw_deg: 180.0,
            },
        ]
    }
}
