// src/config.rs
//! Configuration management with file-backed storage

use crate::error::{GpsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsConfig {
    pub serial_port: String,
    pub serial_baudrate: u32,
    /// Periodic delivery interval in seconds.
    pub fix_interval: i64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baudrate: 4800,
            fix_interval: 1,
        }
    }
}

impl GpsConfig {
    /// Load configuration from storage
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| GpsError::Other(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GpsError::Other(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to storage
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GpsError::Other(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| GpsError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, contents)
            .map_err(|e| GpsError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get config file path
    fn get_config_path() -> Result<std::path::PathBuf> {
        use std::path::PathBuf;

        let home = std::env::var("HOME")
            .map_err(|_| GpsError::Other("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("gps-provider")
            .join("config.json"))
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.serial_port = port;
        self.serial_baudrate = baudrate;
    }

    /// Update the delivery interval
    pub fn update_fix_interval(&mut self, seconds: i64) {
        self.fix_interval = seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GpsConfig::default();
        assert_eq!(config.serial_baudrate, 4800);
        assert_eq!(config.fix_interval, 1);
    }

    #[test]
    fn test_update_serial() {
        let mut config = GpsConfig::default();
        config.update_serial("/dev/ttyS2".to_string(), 19200);
        assert_eq!(config.serial_port, "/dev/ttyS2");
        assert_eq!(config.serial_baudrate, 19200);
    }

    #[test]
    fn test_roundtrip_json() {
        let config = GpsConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GpsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.serial_port, config.serial_port);
        assert_eq!(back.fix_interval, config.fix_interval);
    }
}
