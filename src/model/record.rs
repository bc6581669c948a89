//! Device records and host node identifiers.

use super::speed::LinkSpeed;

/// Host node identifier in sysfs naming: `usbN` for a root hub, then
/// bus-port.port.port... for everything downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePath(pub String);

impl DevicePath {
    /// Create a new device path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Root hub path for a bus number (e.g. 3 -> "usb3").
    pub fn root(bus_num: u8) -> Self {
        Self(format!("usb{}", bus_num))
    }

    /// Get parent device path.
    /// Examples:
    /// - "3-1.2.3" -> "3-1.2"
    /// - "3-1.2" -> "3-1"
    /// - "3-1" -> "usb3" (root hub)
    /// - "usb3" -> None
    pub fn parent(&self) -> Option<DevicePath> {
        if self.is_root_hub() {
            return None;
        }
        if let Some(pos) = self.0.rfind('.') {
            Some(DevicePath(self.0[..pos].to_string()))
        } else {
            self.0
                .rfind('-')
                .map(|pos| DevicePath(format!("usb{}", &self.0[..pos])))
        }
    }

    /// Path of the node attached to `port` of this hub.
    /// - "usb3", port 1 -> "3-1"
    /// - "3-1", port 2 -> "3-1.2"
    pub fn child(&self, port: u8) -> DevicePath {
        match self.0.strip_prefix("usb") {
            Some(bus) => DevicePath(format!("{}-{}", bus, port)),
            None => DevicePath(format!("{}.{}", self.0, port)),
        }
    }

    /// Get bus number from path.
    pub fn bus_num(&self) -> Option<u8> {
        match self.0.strip_prefix("usb") {
            Some(bus) => bus.parse().ok(),
            None => self.0.split('-').next().and_then(|s| s.parse().ok()),
        }
    }

    /// Port path within bus (e.g., "3-1.2.3" -> "1.2.3").
    pub fn port_path(&self) -> Option<&str> {
        self.0.split('-').nth(1)
    }

    /// Ports traversed from the root hub (e.g., "3-1.2.3" -> [1, 2, 3]).
    pub fn port_chain(&self) -> Vec<u8> {
        self.port_path()
            .map(|p| p.split('.').filter_map(|s| s.parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Depth in the USB tree (0 = direct child of root hub).
    pub fn depth(&self) -> usize {
        self.port_path()
            .map(|p| p.matches('.').count())
            .unwrap_or(0)
    }

    /// Check if this is a root hub path (e.g., "usb3").
    pub fn is_root_hub(&self) -> bool {
        self.0.starts_with("usb")
    }
}

impl std::fmt::Display for DevicePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A root hub: an implicit top of the forest, not itself a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHub {
    /// Snapshot-local hub index referenced by the records on its ports.
    pub index: u32,
    pub node: DevicePath,
    pub description: String,
    pub device_path: String,
    /// Number of downstream ports (0 if it could not be read).
    pub port_count: u8,
}

/// One enumerated node (device or hub) attached to a hub port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Hub this device is attached to.
    pub hub_index: u32,
    /// 1-based port on the parent hub.
    pub port_number: u8,
    /// Vendor/product name, best-effort; may be empty.
    pub description: String,
    /// OS path usable to re-query the device within the session.
    pub device_path: String,
    pub is_hub: bool,
    pub speed: LinkSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Host node identifier (e.g., "3-1.2").
    pub node: DevicePath,
    /// Hub index assigned to this record's downstream ports (hubs only).
    pub downstream_index: Option<u32>,
}

impl DeviceRecord {
    /// Format VID:PID as string.
    pub fn vid_pid(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
    }

    /// Vendor and product ids as zero-padded `0x` hex strings.
    pub fn display_ids(&self) -> (String, String) {
        (
            format!("0x{:04X}", self.vendor_id),
            format!("0x{:04X}", self.product_id),
        )
    }

    /// Description, or VID:PID when the device reported none.
    pub fn display_name(&self) -> String {
        if self.description.is_empty() {
            self.vid_pid()
        } else {
            self.description.clone()
        }
    }
}
