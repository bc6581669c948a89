//! Host USB stack abstraction.
//!
//! The enumerator only talks to the host through these traits. A
//! [`UsbHost`] hands out one [`HostSession`] per enumeration pass; dropping
//! the session releases whatever the backend acquired for that pass.

pub mod memory;

use crate::error::{HostError, LoadError};
use crate::model::DevicePath;

pub use memory::{MemoryDevice, MemoryHost};

/// USB device class code for hubs.
pub const HUB_CLASS: u8 = 0x09;

/// A root hub as listed by the host stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubNode {
    pub node: DevicePath,
    pub description: String,
    pub device_path: String,
}

/// Identifying attributes read from a device descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl NodeDescriptor {
    /// Human-readable name: "manufacturer product", either half, or empty.
    pub fn description(&self) -> String {
        let parts: Vec<&str> = [self.manufacturer.as_deref(), self.product.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        parts.join(" ")
    }
}

/// Scoped access to a host USB stack for one enumeration pass.
pub trait HostSession {
    /// Root hubs in a stable host order.
    fn root_hubs(&mut self) -> Result<Vec<HubNode>, HostError>;

    /// Number of downstream ports on a hub.
    fn port_count(&mut self, hub: &DevicePath) -> Result<u8, HostError>;

    /// Node attached to `port` of `hub`, or `None` for an empty port.
    fn attached(&mut self, hub: &DevicePath, port: u8) -> Result<Option<DevicePath>, HostError>;

    fn descriptor(&mut self, node: &DevicePath) -> Result<NodeDescriptor, HostError>;

    /// Raw link-speed signal, classified by [`crate::model::LinkSpeed::from_mbps`].
    fn link_speed(&mut self, node: &DevicePath) -> Result<String, HostError>;

    fn is_hub(
        &mut self,
        _node: &DevicePath,
        descriptor: &NodeDescriptor,
    ) -> Result<bool, HostError> {
        Ok(descriptor.device_class == HUB_CLASS)
    }

    /// OS path for re-querying the node later.
    fn device_path(&self, node: &DevicePath) -> String;
}

/// A host USB stack the enumerator can open sessions on.
pub trait UsbHost: Send + Sync {
    fn open(&self) -> Result<Box<dyn HostSession + '_>, HostError>;

    /// Short backend name for diagnostics.
    fn name(&self) -> &str;
}

/// Locates and loads a usable host backend.
pub trait HostLocator {
    fn locate(&self) -> Result<Box<dyn UsbHost>, LoadError>;
}
