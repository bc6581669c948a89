//! Sysfs-backed host USB stack.

use crate::error::HostError;
use crate::host::{HUB_CLASS, HostSession, HubNode, NodeDescriptor, UsbHost};
use crate::model::DevicePath;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub(crate) const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Host USB stack backed by Linux sysfs device directories.
#[derive(Debug, Clone)]
pub struct SysfsHost {
    base_path: PathBuf,
}

impl Default for SysfsHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsHost {
    /// Create a host using the default sysfs path.
    pub fn new() -> Self {
        Self {
            base_path: PathBuf::from(SYSFS_USB_DEVICES),
        }
    }

    /// Create a host with a custom base path (for testing).
    pub fn with_base_path(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }
}

impl UsbHost for SysfsHost {
    fn open(&self) -> Result<Box<dyn HostSession + '_>, HostError> {
        // An unlistable base directory fails the whole pass up front.
        std::fs::read_dir(&self.base_path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                HostError::PermissionDenied(self.base_path.display().to_string())
            }
            ErrorKind::NotFound => HostError::Unavailable(format!(
                "{} does not exist",
                self.base_path.display()
            )),
            _ => HostError::Io(e),
        })?;

        Ok(Box::new(SysfsSession {
            base_path: &self.base_path,
        }))
    }

    fn name(&self) -> &str {
        "sysfs"
    }
}

/// One pass over the sysfs tree. Attributes are read live, so a device
/// unplugged mid-walk shows up as [`HostError::Disconnected`].
struct SysfsSession<'a> {
    base_path: &'a Path,
}

impl HostSession for SysfsSession<'_> {
    fn root_hubs(&mut self) -> Result<Vec<HubNode>, HostError> {
        let mut buses = Vec::new();
        for entry in std::fs::read_dir(self.base_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if let Some(bus_num_str) = name.strip_prefix("usb")
                && let Ok(bus_num) = bus_num_str.parse::<u8>()
            {
                buses.push(bus_num);
            }
        }
        buses.sort_unstable();

        Ok(buses
            .into_iter()
            .map(|bus_num| {
                let node = DevicePath::root(bus_num);
                HubNode {
                    description: self.root_description(&node),
                    device_path: self.device_path(&node),
                    node,
                }
            })
            .collect())
    }

    fn port_count(&mut self, hub: &DevicePath) -> Result<u8, HostError> {
        self.read_attr_u8(hub, "maxchild")
    }

    fn attached(&mut self, hub: &DevicePath, port: u8) -> Result<Option<DevicePath>, HostError> {
        let child = hub.child(port);
        match std::fs::metadata(self.node_dir(&child)) {
            Ok(meta) if meta.is_dir() => Ok(Some(child)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::Io(e)),
        }
    }

    fn descriptor(&mut self, node: &DevicePath) -> Result<NodeDescriptor, HostError> {
        let vendor_id = self.read_hex_attr_u16(node, "idVendor")?;
        let product_id = self.read_hex_attr_u16(node, "idProduct")?;
        let device_class = self.read_hex_attr_u8(node, "bDeviceClass").unwrap_or(0);
        let manufacturer = self.read_optional_string(node, "manufacturer");
        let product = self.read_optional_string(node, "product");

        Ok(NodeDescriptor {
            vendor_id,
            product_id,
            device_class,
            manufacturer,
            product,
        })
    }

    fn link_speed(&mut self, node: &DevicePath) -> Result<String, HostError> {
        Ok(self.read_attr_string(node, "speed")?.trim().to_string())
    }

    fn is_hub(&mut self, node: &DevicePath, descriptor: &NodeDescriptor) -> Result<bool, HostError> {
        if descriptor.device_class == HUB_CLASS {
            return Ok(true);
        }
        // Some hubs report their class only at interface level.
        match self.read_attr_u8(node, "maxchild") {
            Ok(ports) => Ok(ports > 0),
            Err(HostError::MissingAttribute(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn device_path(&self, node: &DevicePath) -> String {
        self.node_dir(node).display().to_string()
    }
}

impl SysfsSession<'_> {
    fn node_dir(&self, node: &DevicePath) -> PathBuf {
        self.base_path.join(&node.0)
    }

    /// Root hub description: product string plus controller address.
    fn root_description(&self, node: &DevicePath) -> String {
        let product = self.read_optional_string(node, "product");
        let controller = self.controller_address(node);

        match (product, controller) {
            (Some(p), Some(c)) => format!("{} ({})", p, c),
            (Some(p), None) => p,
            (None, Some(c)) => format!("USB root hub ({})", c),
            (None, None) => format!("USB root hub {}", node),
        }
    }

    /// PCI address of the controller owning a root hub, from the symlink
    /// target of `usbN`.
    fn controller_address(&self, node: &DevicePath) -> Option<String> {
        let target = std::fs::read_link(self.node_dir(node)).ok()?;
        let path_str = target.to_string_lossy();

        // ../../../devices/pci0000:00/0000:00:08.1/0000:c1:00.4/usb1
        // We want the last PCI address before usbN
        let components: Vec<&str> = path_str.split('/').collect();
        for (i, component) in components.iter().enumerate() {
            if component.starts_with("usb") && i > 0 {
                let prev = components[i - 1];
                if prev.len() >= 7 && prev.contains(':') && prev.contains('.') {
                    return Some(prev.to_string());
                }
            }
        }
        None
    }

    // Helper methods for reading sysfs attributes

    fn read_attr_string(&self, node: &DevicePath, attr: &str) -> Result<String, HostError> {
        let dir = self.node_dir(node);
        std::fs::read_to_string(dir.join(attr)).map_err(|e| match e.kind() {
            ErrorKind::NotFound if !dir.exists() => HostError::Disconnected(node.0.clone()),
            ErrorKind::NotFound => HostError::MissingAttribute(attr.to_string()),
            ErrorKind::PermissionDenied => {
                HostError::PermissionDenied(dir.join(attr).display().to_string())
            }
            // ENODEV: the device went away while the attribute was read.
            _ if e.raw_os_error() == Some(19) => HostError::Disconnected(node.0.clone()),
            _ => HostError::Io(e),
        })
    }

    fn read_optional_string(&self, node: &DevicePath, attr: &str) -> Option<String> {
        self.read_attr_string(node, attr)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn read_attr_u8(&self, node: &DevicePath, attr: &str) -> Result<u8, HostError> {
        let content = self.read_attr_string(node, attr)?;
        content
            .trim()
            .parse()
            .map_err(|e| HostError::Parse(attr.to_string(), format!("{}", e)))
    }

    fn read_hex_attr_u8(&self, node: &DevicePath, attr: &str) -> Result<u8, HostError> {
        let content = self.read_attr_string(node, attr)?;
        u8::from_str_radix(content.trim(), 16)
            .map_err(|e| HostError::Parse(attr.to_string(), format!("{}", e)))
    }

    fn read_hex_attr_u16(&self, node: &DevicePath, attr: &str) -> Result<u16, HostError> {
        let content = self.read_attr_string(node, attr)?;
        u16::from_str_radix(content.trim(), 16)
            .map_err(|e| HostError::Parse(attr.to_string(), format!("{}", e)))
    }
}
