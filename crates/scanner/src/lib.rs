//! usb-printer-scan scanner
//!
//! Discovers locally attached USB printers and walks the permission-gated
//! serial number read across all privileged targets, one at a time. The scan
//! coordinator lives in [`scan`]; the rusb-backed collector, access probe,
//! and serial reader run on a dedicated USB thread managed by [`usb`].

pub mod config;
pub mod scan;
pub mod usb;
