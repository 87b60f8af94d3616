//! Shared types for usb-printer-scan
//!
//! This crate defines the device descriptor delivered to callers, the opaque
//! device identity used throughout a scan, and the scan-level error taxonomy.
//! The serde form of [`PrinterDescriptor`] is the seven-key mapping handed
//! across the system boundary (`deviceId`, `deviceName`, `manufacturerName`,
//! `productName`, `vendorId`, `productId`, `serialNumber`).

pub mod error;
pub mod types;

pub use error::{CollectorError, ReadError, Result, ScanError};
pub use types::{CancelStatus, DeviceKey, PrinterDescriptor};
