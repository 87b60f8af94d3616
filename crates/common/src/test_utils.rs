//! Test utilities for usb-printer-scan
//!
//! Provides descriptor builders and a scriptable mock USB worker used by the
//! coordinator tests. The mock drives the real channel bridge, so tests
//! exercise the same suspension and event paths as the production worker.
//!
//! # Example
//!
//! ```
//! use common::test_utils::mock_printer;
//!
//! let device = mock_printer(1, "CITIZEN", "CL-S521");
//! assert_eq!(device.manufacturer_name, "CITIZEN");
//! assert!(device.serial_number.is_none());
//! ```

use crate::channel::{UsbCommand, UsbEvent, UsbWorker};
use protocol::{CollectorError, DeviceKey, PrinterDescriptor, ReadError};
use std::collections::HashMap;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock printer descriptor
///
/// The device name and IDs are derived from `id` so descriptors stay
/// distinguishable in assertions.
pub fn mock_printer(id: u32, manufacturer: &str, product: &str) -> PrinterDescriptor {
    PrinterDescriptor::new(
        DeviceKey(id),
        format!("/dev/bus/usb/001/{:03}", id),
        manufacturer,
        product,
        0x1d90,
        0x2000 + id as u16,
    )
}

/// Create a mock privileged-target printer descriptor
pub fn mock_privileged_printer(id: u32, manufacturer: &str, product: &str) -> PrinterDescriptor {
    let mut desc = mock_printer(id, manufacturer, product);
    desc.privileged = true;
    desc
}

/// How the mock broker answers a permission request for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionScript {
    /// `HasPermission` probe answers true; no round-trip happens
    AlreadyGranted,
    /// Probe answers false, the later request is granted
    #[default]
    Grant,
    /// Probe answers false, the later request is denied
    Deny,
    /// Probe answers false and the request is never answered (timeout path)
    Silent,
}

/// Scriptable mock USB worker
///
/// Responds to bridge commands according to per-device scripts. Consumed by
/// [`MockUsb::spawn`], which runs the command loop as a tokio task until a
/// `Shutdown` command arrives or the bridge is dropped.
pub struct MockUsb {
    snapshot: Result<Vec<PrinterDescriptor>, CollectorError>,
    permissions: HashMap<DeviceKey, PermissionScript>,
    serials: HashMap<DeviceKey, Result<String, ReadError>>,
    event_delay: Duration,
}

impl MockUsb {
    /// Mock worker whose enumeration returns the given snapshot
    pub fn new(snapshot: Vec<PrinterDescriptor>) -> Self {
        Self {
            snapshot: Ok(snapshot),
            permissions: HashMap::new(),
            serials: HashMap::new(),
            event_delay: Duration::ZERO,
        }
    }

    /// Mock worker whose enumeration fails
    pub fn failing_collector(message: &str) -> Self {
        Self {
            snapshot: Err(CollectorError::new(message)),
            permissions: HashMap::new(),
            serials: HashMap::new(),
            event_delay: Duration::ZERO,
        }
    }

    /// Set the permission script for one device (default: [`PermissionScript::Grant`])
    pub fn permission(mut self, device: DeviceKey, script: PermissionScript) -> Self {
        self.permissions.insert(device, script);
        self
    }

    /// Set the serial number returned when the device is read
    pub fn serial(mut self, device: DeviceKey, serial: &str) -> Self {
        self.serials.insert(device, Ok(serial.to_string()));
        self
    }

    /// Make the serial read fail for one device
    pub fn failing_serial(mut self, device: DeviceKey, error: ReadError) -> Self {
        self.serials.insert(device, Err(error));
        self
    }

    /// Delay permission events by the given duration
    pub fn event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    /// Run the mock command loop on a tokio task
    pub fn spawn(self, worker: UsbWorker) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(cmd) = worker.next_command().await {
                match cmd {
                    UsbCommand::ListPrinters { response } => {
                        let _ = response.send(self.snapshot.clone());
                    }
                    UsbCommand::HasPermission { device, response } => {
                        let script = self.permissions.get(&device).copied().unwrap_or_default();
                        let _ = response.send(script == PermissionScript::AlreadyGranted);
                    }
                    UsbCommand::RequestPermission { device, epoch } => {
                        let script = self.permissions.get(&device).copied().unwrap_or_default();
                        let granted = match script {
                            PermissionScript::AlreadyGranted | PermissionScript::Grant => true,
                            PermissionScript::Deny => false,
                            PermissionScript::Silent => continue,
                        };
                        if !self.event_delay.is_zero() {
                            tokio::time::sleep(self.event_delay).await;
                        }
                        let _ = worker
                            .send_event_async(UsbEvent::PermissionResult {
                                device,
                                granted,
                                epoch,
                            })
                            .await;
                    }
                    UsbCommand::ReadSerial { device, response } => {
                        let result = self
                            .serials
                            .get(&device)
                            .cloned()
                            .unwrap_or(Err(ReadError::NoSerialNumber(device)));
                        let _ = response.send(result);
                    }
                    UsbCommand::Shutdown => break,
                }
            }
        })
    }
}
