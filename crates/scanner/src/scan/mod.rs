//! Scan coordination
//!
//! The coordinator owns the scan lifecycle: it takes one device snapshot,
//! partitions out the privileged targets, and drives the permission
//! round-trip and serial read for each target in enumeration order. Exactly
//! one scan session may exist at a time.

pub mod coordinator;
pub mod session;

pub use coordinator::{ScanHandle, ScanTimeouts, spawn_coordinator};
pub use session::{ScanSession, ScanStatus};
