//! Common utilities for usb-printer-scan
//!
//! This crate provides shared functionality between the scan coordinator and
//! the USB worker thread: the async channel bridge carrying commands and
//! permission events across the runtime boundary, error handling, logging
//! setup, and mock collaborators for testing.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{SessionEpoch, UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
