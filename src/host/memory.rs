//! In-memory host USB stack.
//!
//! Topology is built by plugging devices into ports; faults can be injected
//! per node to reproduce devices that vanish or refuse queries mid-walk.
//! Clones share state, so a test can keep a handle while the enumerator owns
//! another.

use super::{HUB_CLASS, HostSession, HubNode, NodeDescriptor, UsbHost};
use crate::error::HostError;
use crate::model::DevicePath;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Query failures that can be injected for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Checking the port the node is attached to fails.
    Attach,
    /// Reading the descriptor fails with an I/O error.
    Descriptor,
    /// Reading the descriptor is refused.
    PermissionDenied,
    /// Reading the link speed fails with an I/O error.
    Speed,
    /// The node (and everything below it) disappears right after its
    /// descriptor has been read.
    VanishAfterDescriptor,
    /// Reading the hub's port count fails.
    PortCount,
    /// Deciding whether the node is a hub fails.
    HubCheck,
}

/// A device that can be plugged into a [`MemoryHost`] port.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// Raw speed signal in sysfs format ("12", "480", ...).
    pub speed: String,
    pub port_count: u8,
}

impl MemoryDevice {
    /// A High Speed leaf device.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            device_class: 0,
            manufacturer: None,
            product: None,
            speed: "480".to_string(),
            port_count: 0,
        }
    }

    /// A High Speed hub with `port_count` downstream ports.
    pub fn hub(vendor_id: u16, product_id: u16, port_count: u8) -> Self {
        Self {
            device_class: HUB_CLASS,
            port_count,
            ..Self::new(vendor_id, product_id)
        }
    }

    pub fn with_speed(mut self, mbps: &str) -> Self {
        self.speed = mbps.to_string();
        self
    }

    pub fn with_strings(mut self, manufacturer: &str, product: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self.product = Some(product.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct State {
    /// Bus number -> (port count, description).
    roots: BTreeMap<u8, (u8, String)>,
    devices: BTreeMap<DevicePath, MemoryDevice>,
    faults: HashSet<(DevicePath, Fault)>,
    open_failure: Option<String>,
    root_failure: Option<String>,
    latency: Duration,
    open_sessions: usize,
    sessions_opened: usize,
    peak_sessions: usize,
}

impl State {
    fn remove_subtree(&mut self, node: &DevicePath) {
        let prefix = format!("{}.", node.0);
        self.devices
            .retain(|path, _| path != node && !path.0.starts_with(&prefix));
    }

    fn has_fault(&self, node: &DevicePath, fault: Fault) -> bool {
        self.faults.contains(&(node.clone(), fault))
    }

    fn device(&self, node: &DevicePath) -> Result<&MemoryDevice, HostError> {
        self.devices
            .get(node)
            .ok_or_else(|| HostError::Disconnected(node.0.clone()))
    }
}

/// Scripted host USB stack held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<State>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a root hub for `bus` and return its node.
    pub fn add_root(&self, bus: u8, port_count: u8) -> DevicePath {
        self.state().roots.insert(
            bus,
            (port_count, format!("Memory Host Controller {}", bus)),
        );
        DevicePath::root(bus)
    }

    /// Plug a device into `port` of `hub` and return its node.
    pub fn plug(&self, hub: &DevicePath, port: u8, device: MemoryDevice) -> DevicePath {
        let node = hub.child(port);
        self.state().devices.insert(node.clone(), device);
        node
    }

    /// Remove a device and everything downstream of it.
    pub fn unplug(&self, node: &DevicePath) {
        self.state().remove_subtree(node);
    }

    pub fn inject(&self, node: &DevicePath, fault: Fault) {
        self.state().faults.insert((node.clone(), fault));
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Make every subsequent `open` fail.
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state().open_failure = Some(reason.into());
    }

    /// Make listing root hubs fail.
    pub fn fail_root_listing(&self, reason: impl Into<String>) {
        self.state().root_failure = Some(reason.into());
    }

    /// Delay applied to every port query.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    /// Sessions opened since creation.
    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    /// Highest number of sessions open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.state().peak_sessions
    }
}

impl UsbHost for MemoryHost {
    fn open(&self) -> Result<Box<dyn HostSession + '_>, HostError> {
        let mut state = self.state();
        if let Some(reason) = &state.open_failure {
            return Err(HostError::Unavailable(reason.clone()));
        }
        state.open_sessions += 1;
        state.sessions_opened += 1;
        state.peak_sessions = state.peak_sessions.max(state.open_sessions);
        Ok(Box::new(MemorySession { host: self }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemorySession<'a> {
    host: &'a MemoryHost,
}

impl Drop for MemorySession<'_> {
    fn drop(&mut self) {
        let mut state = self.host.state();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

impl HostSession for MemorySession<'_> {
    fn root_hubs(&mut self) -> Result<Vec<HubNode>, HostError> {
        let state = self.host.state();
        if let Some(reason) = &state.root_failure {
            return Err(HostError::Unavailable(reason.clone()));
        }
        Ok(state
            .roots
            .iter()
            .map(|(bus, (_, description))| {
                let node = DevicePath::root(*bus);
                HubNode {
                    device_path: self.device_path(&node),
                    description: description.clone(),
                    node,
                }
            })
            .collect())
    }

    fn port_count(&mut self, hub: &DevicePath) -> Result<u8, HostError> {
        let state = self.host.state();
        if state.has_fault(hub, Fault::PortCount) {
            return Err(io::Error::other("hub descriptor read failed").into());
        }
        if let Some(bus) = hub.bus_num().filter(|_| hub.is_root_hub()) {
            return state
                .roots
                .get(&bus)
                .map(|(ports, _)| *ports)
                .ok_or_else(|| HostError::Disconnected(hub.0.clone()));
        }
        state.device(hub).map(|d| d.port_count)
    }

    fn attached(&mut self, hub: &DevicePath, port: u8) -> Result<Option<DevicePath>, HostError> {
        let latency = self.host.state().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let state = self.host.state();
        let node = hub.child(port);
        if state.has_fault(&node, Fault::Attach) {
            return Err(io::Error::other("port status query failed").into());
        }
        Ok(state.devices.contains_key(&node).then_some(node))
    }

    fn descriptor(&mut self, node: &DevicePath) -> Result<NodeDescriptor, HostError> {
        let mut state = self.host.state();
        if state.has_fault(node, Fault::PermissionDenied) {
            return Err(HostError::PermissionDenied(node.0.clone()));
        }
        if state.has_fault(node, Fault::Descriptor) {
            return Err(io::Error::other("descriptor read failed").into());
        }
        let device = state.device(node)?;
        let descriptor = NodeDescriptor {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            device_class: device.device_class,
            manufacturer: device.manufacturer.clone(),
            product: device.product.clone(),
        };
        if state.has_fault(node, Fault::VanishAfterDescriptor) {
            state.remove_subtree(node);
        }
        Ok(descriptor)
    }

    fn link_speed(&mut self, node: &DevicePath) -> Result<String, HostError> {
        let state = self.host.state();
        if state.has_fault(node, Fault::Speed) {
            return Err(io::Error::other("speed query failed").into());
        }
        state.device(node).map(|d| d.speed.clone())
    }

    fn is_hub(&mut self, node: &DevicePath, descriptor: &NodeDescriptor) -> Result<bool, HostError> {
        if self.host.state().has_fault(node, Fault::HubCheck) {
            return Err(io::Error::other("hub status query failed").into());
        }
        Ok(descriptor.device_class == HUB_CLASS)
    }

    fn device_path(&self, node: &DevicePath) -> String {
        format!("memory://{}", node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plug_and_query() {
        let host = MemoryHost::new();
        let root = host.add_root(1, 4);
        let node = host.plug(
            &root,
            2,
            MemoryDevice::new(0x046d, 0xc52b).with_speed("12"),
        );
        assert_eq!(node, DevicePath::new("1-2"));

        let mut session = host.open().unwrap();
        assert_eq!(session.root_hubs().unwrap().len(), 1);
        assert_eq!(session.port_count(&root).unwrap(), 4);
        assert_eq!(session.attached(&root, 1).unwrap(), None);
        assert_eq!(session.attached(&root, 2).unwrap(), Some(node.clone()));
        assert_eq!(session.descriptor(&node).unwrap().vendor_id, 0x046d);
        assert_eq!(session.link_speed(&node).unwrap(), "12");
    }

    #[test]
    fn test_session_accounting() {
        let host = MemoryHost::new();
        {
            let _a = host.open().unwrap();
            let _b = host.open().unwrap();
            assert_eq!(host.open_sessions(), 2);
        }
        assert_eq!(host.open_sessions(), 0);
        assert_eq!(host.sessions_opened(), 2);
        assert_eq!(host.peak_sessions(), 2);
    }

    #[test]
    fn test_vanish_after_descriptor() {
        let host = MemoryHost::new();
        let root = host.add_root(1, 2);
        let hub = host.plug(&root, 1, MemoryDevice::hub(0x05e3, 0x0610, 4));
        let leaf = host.plug(&hub, 1, MemoryDevice::new(1, 1));
        host.inject(&hub, Fault::VanishAfterDescriptor);

        let mut session = host.open().unwrap();
        assert!(session.descriptor(&hub).is_ok());
        assert!(matches!(
            session.link_speed(&hub),
            Err(HostError::Disconnected(_))
        ));
        assert!(matches!(
            session.descriptor(&leaf),
            Err(HostError::Disconnected(_))
        ));
    }

    #[test]
    fn test_unplug_keeps_similar_prefixes() {
        let host = MemoryHost::new();
        let root = host.add_root(1, 12);
        let one = host.plug(&root, 1, MemoryDevice::new(1, 1));
        let ten = host.plug(&root, 10, MemoryDevice::new(1, 10));
        host.unplug(&one);

        let mut session = host.open().unwrap();
        assert_eq!(session.attached(&root, 1).unwrap(), None);
        assert_eq!(session.attached(&root, 10).unwrap(), Some(ten));
    }

    #[test]
    fn test_open_failure() {
        let host = MemoryHost::new();
        host.fail_open("driver missing");
        assert!(matches!(host.open(), Err(HostError::Unavailable(_))));
        assert_eq!(host.open_sessions(), 0);
    }
}
