//! USB printer collector
//!
//! Enumerates attached devices, classifies privileged targets by
//! manufacturer, probes access rights, and reads serial number string
//! descriptors. All operations are synchronous and run on the USB worker
//! thread.

use protocol::{CollectorError, DeviceKey, PrinterDescriptor, ReadError};
use rusb::{Context, Device, UsbContext};
use tracing::{debug, warn};

/// Collector over one rusb context
pub struct PrinterCollector {
    context: Context,
    /// VID:PID patterns restricting which devices are reported
    filters: Vec<String>,
    /// Manufacturer substrings marking privileged targets
    privileged_manufacturers: Vec<String>,
}

impl PrinterCollector {
    /// Create a collector
    ///
    /// `filters` uses the `"0xVID:0xPID"` pattern form with `*` wildcards;
    /// an empty list reports every device. `privileged_manufacturers` holds
    /// case-insensitive substrings matched against the manufacturer string.
    pub fn new(
        filters: Vec<String>,
        privileged_manufacturers: Vec<String>,
    ) -> Result<Self, CollectorError> {
        let context = Context::new()
            .map_err(|e| CollectorError::new(format!("USB context init failed: {}", e)))?;

        Ok(Self {
            context,
            filters,
            privileged_manufacturers,
        })
    }

    /// Snapshot all attached devices in enumeration order
    ///
    /// Root hubs and filtered-out devices are skipped. Never fails for "no
    /// devices": an empty bus yields an empty list.
    pub fn list_printers(&self) -> Result<Vec<PrinterDescriptor>, CollectorError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| CollectorError::new(format!("Device enumeration failed: {}", e)))?;

        let mut snapshot = Vec::new();
        for device in devices.iter() {
            if let Some(descriptor) = self.describe(&device) {
                snapshot.push(descriptor);
            }
        }

        debug!("Enumerated {} devices", snapshot.len());
        Ok(snapshot)
    }

    /// Build a descriptor for one device, or None if it is skipped
    fn describe(&self, device: &Device<Context>) -> Option<PrinterDescriptor> {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "Skipping device at bus={} addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                return None;
            }
        };

        // Root hubs are infrastructure, not candidate printers
        if desc.vendor_id() == 0x1d6b && desc.class_code() == 9 {
            return None;
        }

        if !check_filter(desc.vendor_id(), desc.product_id(), &self.filters) {
            debug!(
                "Device ignored by filter: vid={:#x}, pid={:#x}",
                desc.vendor_id(),
                desc.product_id()
            );
            return None;
        }

        // String reads need a temporary open; devices we cannot open still
        // appear in the snapshot, just with empty strings.
        let (manufacturer, product) = match device.open() {
            Ok(handle) => {
                let manufacturer = desc
                    .manufacturer_string_index()
                    .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
                    .unwrap_or_default();
                let product = desc
                    .product_string_index()
                    .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
                    .unwrap_or_default();
                (manufacturer, product)
            }
            Err(_) => (String::new(), String::new()),
        };

        let mut descriptor = PrinterDescriptor::new(
            device_key(device),
            device_node_path(device),
            manufacturer,
            product,
            desc.vendor_id(),
            desc.product_id(),
        );
        descriptor.privileged =
            is_privileged(&descriptor.manufacturer_name, &self.privileged_manufacturers);

        Some(descriptor)
    }

    /// Whether the protected attribute is readable right now
    ///
    /// An open attempt is the udev-level analog of the host permission check:
    /// it succeeds only when the process already has access rights.
    pub fn has_access(&self, key: DeviceKey) -> bool {
        match self.find_device(key) {
            Some(device) => device.open().is_ok(),
            None => false,
        }
    }

    /// Resolve a permission request
    ///
    /// There is no interactive prompt to drive here; the decision is the
    /// access probe outcome, delivered to the coordinator as the asynchronous
    /// permission event.
    pub fn probe_access(&self, key: DeviceKey) -> bool {
        self.has_access(key)
    }

    /// Read the serial number string descriptor of one device
    pub fn read_serial(&self, key: DeviceKey) -> Result<String, ReadError> {
        let device = self.find_device(key).ok_or(ReadError::DeviceGone(key))?;

        let desc = device
            .device_descriptor()
            .map_err(|e| ReadError::Transport {
                device: key,
                message: e.to_string(),
            })?;

        let handle = device.open().map_err(|e| match e {
            rusb::Error::Access => ReadError::AccessDenied(key),
            rusb::Error::NoDevice | rusb::Error::NotFound => ReadError::DeviceGone(key),
            other => ReadError::Transport {
                device: key,
                message: other.to_string(),
            },
        })?;

        let index = desc
            .serial_number_string_index()
            .ok_or(ReadError::NoSerialNumber(key))?;

        handle
            .read_string_descriptor_ascii(index)
            .map_err(|e| ReadError::Transport {
                device: key,
                message: e.to_string(),
            })
    }

    /// Find the attached device a key refers to
    fn find_device(&self, key: DeviceKey) -> Option<Device<Context>> {
        let devices = self.context.devices().ok()?;
        devices.iter().find(|d| device_key(d) == key)
    }
}

/// Derive the opaque scan identity for a device
///
/// Bus number and address are stable while the device stays attached, which
/// covers the duration of one scan.
pub fn device_key(device: &Device<Context>) -> DeviceKey {
    DeviceKey(((device.bus_number() as u32) << 8) | device.address() as u32)
}

/// Platform device name in the usbfs form
fn device_node_path(device: &Device<Context>) -> String {
    format!(
        "/dev/bus/usb/{:03}/{:03}",
        device.bus_number(),
        device.address()
    )
}

/// Whether a manufacturer string marks a privileged target
pub fn is_privileged(manufacturer: &str, patterns: &[String]) -> bool {
    let upper = manufacturer.to_uppercase();
    patterns
        .iter()
        .any(|pattern| upper.contains(&pattern.to_uppercase()))
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filter format: `"0xVID:0xPID"` with `*` accepted for either side. An
/// empty filter list allows all devices.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    for filter in filters {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            continue;
        }

        let vid_match = if parts[0] == "*" {
            true
        } else {
            u16::from_str_radix(parts[0].trim_start_matches("0x"), 16)
                .map(|v| v == vid)
                .unwrap_or(false)
        };

        if !vid_match {
            continue;
        }

        let pid_match = if parts[1] == "*" {
            true
        } else {
            u16::from_str_radix(parts[1].trim_start_matches("0x"), 16)
                .map(|p| p == pid)
                .unwrap_or(false)
        };

        if pid_match {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_logic() {
        let filters = vec![
            "0x1d90:0x2060".to_string(), // Exact match
            "0x1cbe:*".to_string(),      // Wildcard PID
        ];

        assert!(check_filter(0x1d90, 0x2060, &filters));
        assert!(check_filter(0x1cbe, 0x0001, &filters));
        assert!(check_filter(0x1cbe, 0x9999, &filters));

        assert!(!check_filter(0x1d90, 0x9999, &filters)); // Wrong PID
        assert!(!check_filter(0x9999, 0x2060, &filters)); // Wrong VID
        assert!(!check_filter(0x0000, 0x0000, &filters));

        // Empty filters = allow all
        assert!(check_filter(0x1d90, 0x2060, &[]));
    }

    #[test]
    fn test_malformed_filter_is_skipped() {
        let filters = vec!["garbage".to_string(), "0x1d90:*".to_string()];
        assert!(check_filter(0x1d90, 0x0001, &filters));
        assert!(!check_filter(0x2222, 0x0001, &filters));
    }

    #[test]
    fn test_privileged_match_is_case_insensitive_substring() {
        let patterns = vec!["CITIZEN".to_string()];
        assert!(is_privileged("CITIZEN SYSTEMS", &patterns));
        assert!(is_privileged("Citizen Systems Japan", &patterns));
        assert!(!is_privileged("Zebra Technologies", &patterns));
        assert!(!is_privileged("", &patterns));
    }

    #[test]
    fn test_no_privileged_patterns_means_no_targets() {
        assert!(!is_privileged("CITIZEN", &[]));
    }

    #[test]
    fn test_collector_creation() {
        // May fail without USB access; only verify we can attempt it
        match PrinterCollector::new(vec![], vec!["CITIZEN".to_string()]) {
            Ok(_) => {}
            Err(e) => {
                eprintln!("collector creation failed (expected without USB): {}", e);
            }
        }
    }
}
