//! Device descriptor and identity types
//!
//! [`DeviceKey`] uniquely identifies one attached device for the duration of
//! a scan. [`PrinterDescriptor`] is the immutable snapshot of one device plus
//! its serial number field, which stays absent until a permission round-trip
//! populates it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque device identity (collector-assigned)
///
/// Stable for one physical device during a single scan. The USB collector
/// derives it from the bus number and bus address, but callers must treat it
/// as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey(pub u32);

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one attached USB printer
///
/// Built once by the collector at scan start. `serial_number` is the only
/// field that may change afterwards: it is filled in when a permission
/// round-trip succeeds and the string descriptor read returns a value, and
/// stays `None` otherwise. The serde form writes `None` as the empty string,
/// matching the boundary mapping consumers expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrinterDescriptor {
    /// Opaque device identity
    pub device_id: DeviceKey,
    /// Platform device name (e.g. the sysfs path)
    pub device_name: String,
    /// Manufacturer string, empty when the device reports none
    pub manufacturer_name: String,
    /// Product string, empty when the device reports none
    pub product_name: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Hardware serial number, present only after a successful protected read
    #[serde(
        serialize_with = "serialize_serial",
        deserialize_with = "deserialize_serial"
    )]
    pub serial_number: Option<String>,
    /// Whether reading the serial number requires a permission round-trip
    #[serde(skip)]
    pub privileged: bool,
}

impl PrinterDescriptor {
    /// Create a descriptor with no serial number
    pub fn new(
        device_id: DeviceKey,
        device_name: impl Into<String>,
        manufacturer_name: impl Into<String>,
        product_name: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
    ) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            manufacturer_name: manufacturer_name.into(),
            product_name: product_name.into(),
            vendor_id,
            product_id,
            serial_number: None,
            privileged: false,
        }
    }
}

/// `None` serializes as the empty string so the boundary mapping always
/// carries a `serialNumber` key.
fn serialize_serial<S: Serializer>(
    serial: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(serial.as_deref().unwrap_or(""))
}

fn deserialize_serial<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

/// Outcome of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    /// A scan was active; partial results were delivered to its caller
    Cancelled,
    /// No scan was active, nothing changed
    NothingToCancel,
}

impl std::fmt::Display for CancelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelStatus::Cancelled => write!(f, "Scan cancelled"),
            CancelStatus::NothingToCancel => write!(f, "No scan in progress, nothing to cancel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrinterDescriptor {
        PrinterDescriptor::new(
            DeviceKey(1002),
            "/dev/bus/usb/003/010",
            "CITIZEN",
            "CL-E321",
            0x1d90,
            0x2060,
        )
    }

    #[test]
    fn test_wire_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "deviceId",
            "deviceName",
            "manufacturerName",
            "productName",
            "vendorId",
            "productId",
            "serialNumber",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        // The privileged flag is internal only
        assert_eq!(obj.len(), 7);
    }

    #[test]
    fn test_missing_serial_serializes_as_empty_string() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["serialNumber"], "");
    }

    #[test]
    fn test_present_serial_round_trips() {
        let mut desc = sample();
        desc.serial_number = Some("SN123".to_string());
        let json = serde_json::to_string(&desc).unwrap();
        let back: PrinterDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.serial_number.as_deref(), Some("SN123"));
    }

    #[test]
    fn test_empty_serial_deserializes_as_none() {
        let json = serde_json::to_string(&sample()).unwrap();
        let back: PrinterDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.serial_number, None);
    }

    #[test]
    fn test_cancel_status_display() {
        assert_eq!(CancelStatus::Cancelled.to_string(), "Scan cancelled");
        assert!(
            CancelStatus::NothingToCancel
                .to_string()
                .contains("nothing to cancel")
        );
    }
}
