//! USB collaborators
//!
//! Synchronous rusb work lives here, on a dedicated OS thread: device
//! enumeration, the access probe standing in for the host permission check,
//! and the protected serial number read.

pub mod collector;
pub mod worker;

pub use collector::PrinterCollector;
pub use worker::spawn_usb_worker;
