//! Scanner configuration management

use crate::scan::ScanTimeouts;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Timeout ceilings for a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Ceiling for one device's permission wait, in seconds
    #[serde(default = "ScanSettings::default_device_timeout")]
    pub device_timeout_secs: u64,
    /// Ceiling for the entire scan, in seconds
    #[serde(default = "ScanSettings::default_global_timeout")]
    pub global_timeout_secs: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            device_timeout_secs: Self::default_device_timeout(),
            global_timeout_secs: Self::default_global_timeout(),
        }
    }
}

impl ScanSettings {
    fn default_device_timeout() -> u64 {
        10
    }

    fn default_global_timeout() -> u64 {
        60
    }

    /// Convert to coordinator timeouts
    pub fn timeouts(&self) -> ScanTimeouts {
        ScanTimeouts {
            per_device: Duration::from_secs(self.device_timeout_secs),
            global: Duration::from_secs(self.global_timeout_secs),
        }
    }
}

/// Device selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns restricting which devices are reported (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Manufacturer substrings whose devices get the serial number
    /// round-trip
    #[serde(default = "UsbSettings::default_privileged_manufacturers")]
    pub privileged_manufacturers: Vec<String>,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            privileged_manufacturers: Self::default_privileged_manufacturers(),
        }
    }
}

impl UsbSettings {
    fn default_privileged_manufacturers() -> Vec<String> {
        vec!["CITIZEN".to_string()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "LogSettings::default_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LogSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan: ScanSettings::default(),
            usb: UsbSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-printer-scan/scanner.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ScannerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
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
            config_dir.join("usb-printer-scan").join("scanner.toml")
        } else {
            PathBuf::from(".config/usb-printer-scan/scanner.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }

        if self.scan.device_timeout_secs == 0 {
            return Err(anyhow!("device_timeout_secs must be greater than 0"));
        }
        if self.scan.global_timeout_secs == 0 {
            return Err(anyhow!("global_timeout_secs must be greater than 0"));
        }
        if self.scan.device_timeout_secs > self.scan.global_timeout_secs {
            return Err(anyhow!(
                "device_timeout_secs ({}) must not exceed global_timeout_secs ({})",
                self.scan.device_timeout_secs,
                self.scan.global_timeout_secs
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1d90:0x2060' or '0x1d90:*')",
                filter
            ));
        }

        for part in parts {
            if part == "*" {
                continue;
            }
            u16::from_str_radix(part.trim_start_matches("0x"), 16)
                .map_err(|_| anyhow!("Invalid hex value '{}' in filter '{}'", part, filter))?;
        }

        Ok(())
    }
}
