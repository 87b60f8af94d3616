//! Scan error taxonomy
//!
//! Only scan-level conditions surface to the caller of a scan. Per-device
//! conditions (permission denied, permission timeout, failed serial read) are
//! absorbed by the coordinator and recorded as a missing serial number.

use crate::types::DeviceKey;
use thiserror::Error;

/// Scan-level errors returned to the caller of `start_scan`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// A scan was requested while another is active; nothing was mutated
    #[error("Another USB scan is already in progress")]
    ScanInProgress,

    /// Device enumeration itself failed; no partial results exist
    #[error("Device enumeration failed: {0}")]
    Collector(#[from] CollectorError),

    /// The coordinator task went away before replying (shutdown race)
    #[error("Scan coordinator unavailable")]
    CoordinatorGone,
}

/// Device enumeration failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CollectorError {
    /// Underlying cause, already formatted
    pub message: String,
}

impl CollectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reading a protected attribute from one device
///
/// Never propagated to the scan caller; the coordinator logs the cause and
/// leaves the device's serial number absent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The device disappeared between enumeration and the read
    #[error("Device {0} no longer attached")]
    DeviceGone(DeviceKey),

    /// Access was revoked or never actually granted
    #[error("Access denied reading serial number of device {0}")]
    AccessDenied(DeviceKey),

    /// The device exposes no serial number string descriptor
    #[error("Device {0} reports no serial number")]
    NoSerialNumber(DeviceKey),

    /// Transport-level failure during the string descriptor read
    #[error("Serial number read failed for device {device}: {message}")]
    Transport { device: DeviceKey, message: String },
}

/// Type alias for scan results
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_in_progress_display() {
        let msg = ScanError::ScanInProgress.to_string();
        assert!(msg.contains("already in progress"));
    }

    #[test]
    fn test_collector_error_wraps() {
        let err: ScanError = CollectorError::new("libusb init failed").into();
        assert!(err.to_string().contains("libusb init failed"));
    }

    #[test]
    fn test_read_error_display() {
        let err = ReadError::Transport {
            device: DeviceKey(7),
            message: "pipe error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("device 7"));
        assert!(msg.contains("pipe error"));
    }
}
