//! Topology enumerator: one host walk per call, one snapshot per walk.

use crate::error::{DeviceQueryError, EnumerationError, HostError, QueryStage};
use crate::host::{HostSession, UsbHost};
use crate::model::{DevicePath, DeviceRecord, LinkSpeed, RootHub, Snapshot};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Hub tiers below a root hub that are descended by default.
pub const DEFAULT_MAX_HUB_DEPTH: usize = 7;

/// Walk tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Hubs nested deeper than this are recorded but their ports are not
    /// walked.
    pub max_hub_depth: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_hub_depth: DEFAULT_MAX_HUB_DEPTH,
        }
    }
}

/// Produces snapshots of the host's USB topology.
///
/// Overlapping calls from several threads are serialized; each call opens
/// its own host session and releases it before returning, whatever the
/// outcome. Nothing is cached between calls.
pub struct Enumerator {
    host: Box<dyn UsbHost>,
    options: WalkOptions,
    lock: Mutex<()>,
}

impl Enumerator {
    pub fn new(host: Box<dyn UsbHost>) -> Self {
        Self::with_options(host, WalkOptions::default())
    }

    pub fn with_options(host: Box<dyn UsbHost>, options: WalkOptions) -> Self {
        Self {
            host,
            options,
            lock: Mutex::new(()),
        }
    }

    /// Walk every root hub and return the devices found, in discovery order.
    ///
    /// Devices that fail a query are left out and reported through
    /// [`Snapshot::skipped`]; only failing to reach the host stack at all is
    /// an error.
    pub fn enumerate(&self) -> Result<Snapshot, EnumerationError> {
        // The lock guards no data, so a panic in another pass leaves nothing
        // inconsistent behind.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut session = self
            .host
            .open()
            .map_err(EnumerationError::Initialization)?;
        debug!("Opened {} host session", self.host.name());

        let snapshot = Walk::new(self.options).run(session.as_mut())?;

        info!(
            "Enumerated {} device(s) on {} root hub(s), {} skipped",
            snapshot.len(),
            snapshot.roots().len(),
            snapshot.skipped().len()
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for Enumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enumerator")
            .field("host", &self.host.name())
            .field("options", &self.options)
            .finish()
    }
}

/// A hub whose ports are being walked.
struct Frame {
    hub_index: u32,
    node: DevicePath,
    port_count: u8,
    // u16 so that incrementing past port 255 cannot overflow.
    next_port: u16,
    /// Hub tier below the root hub (0 for the root hub itself).
    depth: usize,
}

impl Frame {
    fn new(hub_index: u32, node: DevicePath, port_count: u8, depth: usize) -> Self {
        Self {
            hub_index,
            node,
            port_count,
            next_port: 1,
            depth,
        }
    }
}

/// State of a single pass.
struct Walk {
    options: WalkOptions,
    records: Vec<DeviceRecord>,
    skipped: Vec<DeviceQueryError>,
    next_hub_index: u32,
}

impl Walk {
    fn new(options: WalkOptions) -> Self {
        Self {
            options,
            records: Vec::new(),
            skipped: Vec::new(),
            next_hub_index: 0,
        }
    }

    fn run(mut self, session: &mut dyn HostSession) -> Result<Snapshot, EnumerationError> {
        let hubs = session.root_hubs().map_err(EnumerationError::RootHubs)?;

        // Root indices depend only on the root set, nested hubs come after.
        let mut roots = Vec::with_capacity(hubs.len());
        for (index, hub) in (0u32..).zip(hubs) {
            let port_count = self
                .query(
                    session.port_count(&hub.node),
                    index,
                    None,
                    &hub.node,
                    QueryStage::Ports,
                )
                .unwrap_or(0);
            debug!("Root hub {} ({}) has {} port(s)", index, hub.node, port_count);
            roots.push(RootHub {
                index,
                node: hub.node,
                description: hub.description,
                device_path: hub.device_path,
                port_count,
            });
        }
        self.next_hub_index = u32::try_from(roots.len()).unwrap_or(u32::MAX);

        for root in &roots {
            let mut stack = vec![Frame::new(root.index, root.node.clone(), root.port_count, 0)];

            while let Some(frame) = stack.last_mut() {
                if frame.next_port > u16::from(frame.port_count) {
                    stack.pop();
                    continue;
                }
                let port = frame.next_port as u8;
                frame.next_port += 1;

                let hub_index = frame.hub_index;
                let depth = frame.depth;
                let hub = frame.node.clone();
                if let Some(child) = self.visit(session, hub_index, &hub, port, depth) {
                    stack.push(child);
                }
            }
        }

        Ok(Snapshot::from_parts(roots, self.records, self.skipped))
    }

    /// Probe one port. Returns a frame when a hub was found whose ports
    /// should be walked next.
    fn visit(
        &mut self,
        session: &mut dyn HostSession,
        hub_index: u32,
        hub: &DevicePath,
        port: u8,
        depth: usize,
    ) -> Option<Frame> {
        let attached = self.query(
            session.attached(hub, port),
            hub_index,
            Some(port),
            &hub.child(port),
            QueryStage::Attach,
        )?;
        let node = attached?;
        debug!("Hub {} port {}: {}", hub_index, port, node);

        let descriptor = self.query(
            session.descriptor(&node),
            hub_index,
            Some(port),
            &node,
            QueryStage::Descriptor,
        )?;
        let raw_speed = self.query(
            session.link_speed(&node),
            hub_index,
            Some(port),
            &node,
            QueryStage::Speed,
        )?;
        let is_hub = self.query(
            session.is_hub(&node, &descriptor),
            hub_index,
            Some(port),
            &node,
            QueryStage::HubCheck,
        )?;

        let mut record = DeviceRecord {
            hub_index,
            port_number: port,
            description: descriptor.description(),
            device_path: session.device_path(&node),
            is_hub,
            speed: LinkSpeed::from_mbps(&raw_speed),
            vendor_id: descriptor.vendor_id,
            product_id: descriptor.product_id,
            node: node.clone(),
            downstream_index: None,
        };

        if !is_hub {
            self.records.push(record);
            return None;
        }

        let index = self.next_hub_index;
        self.next_hub_index += 1;
        record.downstream_index = Some(index);
        self.records.push(record);

        let hub_depth = depth + 1;
        if hub_depth > self.options.max_hub_depth {
            self.skip(DeviceQueryError {
                hub_index: index,
                port: None,
                node: node.0,
                stage: QueryStage::Ports,
                source: HostError::DepthLimit(self.options.max_hub_depth),
            });
            return None;
        }

        let port_count =
            self.query(session.port_count(&node), index, None, &node, QueryStage::Ports)?;
        debug!("Hub {} ({}) has {} port(s)", index, node, port_count);
        Some(Frame::new(index, node, port_count, hub_depth))
    }

    /// Unwrap a query result, turning a failure into a skipped entry.
    fn query<T>(
        &mut self,
        result: Result<T, HostError>,
        hub_index: u32,
        port: Option<u8>,
        node: &DevicePath,
        stage: QueryStage,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(source) => {
                self.skip(DeviceQueryError {
                    hub_index,
                    port,
                    node: node.0.clone(),
                    stage,
                    source,
                });
                None
            }
        }
    }

    fn skip(&mut self, error: DeviceQueryError) {
        warn!("Skipping: {}", error);
        self.skipped.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::Fault;
    use crate::host::{MemoryDevice, MemoryHost};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn enumerator(host: &MemoryHost) -> Enumerator {
        Enumerator::new(Box::new(host.clone()))
    }

    /// usb1 (4 ports): 1 -> hub (4 ports) {2 -> keyboard, 4 -> hub (2 ports) {1 -> disk}}
    ///                 3 -> receiver
    /// usb2 (2 ports): 2 -> webcam
    fn nested_host() -> MemoryHost {
        let host = MemoryHost::new();
        let usb1 = host.add_root(1, 4);
        let usb2 = host.add_root(2, 2);
        let hub = host.plug(&usb1, 1, MemoryDevice::hub(0x05e3, 0x0610, 4));
        host.plug(&hub, 2, MemoryDevice::new(0x04d9, 0x0006).with_speed("1.5"));
        let inner = host.plug(&hub, 4, MemoryDevice::hub(0x2109, 0x2817, 2));
        host.plug(&inner, 1, MemoryDevice::new(0x0781, 0x5581).with_speed("5000"));
        host.plug(&usb1, 3, MemoryDevice::new(0x046d, 0xc52b).with_speed("12"));
        host.plug(&usb2, 2, MemoryDevice::new(0x046d, 0x085e));
        host
    }

    fn tuples(snapshot: &Snapshot) -> Vec<(u32, u8, bool, LinkSpeed, u16, u16)> {
        snapshot
            .records()
            .iter()
            .map(|r| {
                (
                    r.hub_index,
                    r.port_number,
                    r.is_hub,
                    r.speed,
                    r.vendor_id,
                    r.product_id,
                )
            })
            .collect()
    }

    #[test]
    fn test_single_full_speed_device() {
        let host = MemoryHost::new();
        let root = host.add_root(1, 4);
        host.plug(
            &root,
            2,
            MemoryDevice::new(0x046d, 0xc52b)
                .with_speed("12")
                .with_strings("Logitech", "USB Receiver"),
        );

        let snapshot = enumerator(&host).enumerate().unwrap();
        assert_eq!(snapshot.len(), 1);
        let record = &snapshot.records()[0];
        assert_eq!(record.hub_index, 0);
        assert_eq!(record.port_number, 2);
        assert!(!record.is_hub);
        assert_eq!(record.speed, LinkSpeed::Full);
        assert_eq!(record.vendor_id, 0x046d);
        assert_eq!(record.product_id, 0xc52b);
        assert_eq!(record.description, "Logitech USB Receiver");
        assert_eq!(record.device_path, "memory://1-2");
        assert!(snapshot.warning().is_none());
    }

    #[test]
    fn test_nested_hubs_discovery_order() {
        let snapshot = enumerator(&nested_host()).enumerate().unwrap();

        let nodes: Vec<_> = snapshot.records().iter().map(|r| r.node.0.as_str()).collect();
        assert_eq!(nodes, vec!["1-1", "1-1.2", "1-1.4", "1-1.4.1", "1-3", "2-2"]);

        // Roots take 0 and 1, nested hubs follow in discovery order.
        let roots: Vec<_> = snapshot.roots().iter().map(|r| r.index).collect();
        assert_eq!(roots, vec![0, 1]);
        assert_eq!(snapshot.records()[0].downstream_index, Some(2));
        assert_eq!(snapshot.records()[2].downstream_index, Some(3));
        assert_eq!(snapshot.records()[3].hub_index, 3);
        assert_eq!(snapshot.records()[3].speed, LinkSpeed::Super);
        assert_eq!(snapshot.records()[5].hub_index, 1);

        assert_eq!(snapshot.validate(), Ok(()));
        assert_eq!(snapshot.hub_count(), 4);
    }

    #[test]
    fn test_empty_host() {
        let host = MemoryHost::new();
        host.add_root(1, 4);
        let snapshot = enumerator(&host).enumerate().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.roots().len(), 1);

        let no_roots = enumerator(&MemoryHost::new()).enumerate().unwrap();
        assert!(no_roots.is_empty());
        assert!(no_roots.roots().is_empty());
    }

    #[test]
    fn test_device_vanishing_before_speed_read() {
        let host = nested_host();
        let before = enumerator(&host).enumerate().unwrap();

        let receiver = DevicePath::new("1-3");
        host.inject(&receiver, Fault::VanishAfterDescriptor);
        let after = enumerator(&host).enumerate().unwrap();

        assert_eq!(after.len(), before.len() - 1);
        assert!(after.records().iter().all(|r| r.node != receiver));
        let warning = after.warning().unwrap();
        assert_eq!(warning.skipped, 1);

        let skipped = &after.skipped()[0];
        assert_eq!(skipped.stage, QueryStage::Speed);
        assert_eq!(skipped.hub_index, 0);
        assert_eq!(skipped.port, Some(3));
        assert!(matches!(skipped.source, HostError::Disconnected(_)));
        assert_eq!(after.validate(), Ok(()));
    }

    #[test]
    fn test_vanished_hub_takes_subtree() {
        let host = nested_host();
        host.inject(&DevicePath::new("1-1"), Fault::VanishAfterDescriptor);
        let snapshot = enumerator(&host).enumerate().unwrap();

        let nodes: Vec<_> = snapshot.records().iter().map(|r| r.node.0.as_str()).collect();
        assert_eq!(nodes, vec!["1-3", "2-2"]);
        assert_eq!(snapshot.skipped().len(), 1);
        assert_eq!(snapshot.validate(), Ok(()));
    }

    #[test]
    fn test_query_failures_are_skipped() {
        let host = nested_host();
        host.inject(&DevicePath::new("1-1.2"), Fault::PermissionDenied);
        host.inject(&DevicePath::new("2-2"), Fault::Attach);
        let snapshot = enumerator(&host).enumerate().unwrap();

        assert_eq!(snapshot.len(), 4);
        let stages: Vec<_> = snapshot.skipped().iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![QueryStage::Descriptor, QueryStage::Attach]);
        assert!(matches!(
            snapshot.skipped()[0].source,
            HostError::PermissionDenied(_)
        ));
        assert_eq!(snapshot.skipped()[1].node, "2-2");
    }

    #[test]
    fn test_hub_port_count_failure_keeps_hub() {
        let host = nested_host();
        host.inject(&DevicePath::new("1-1"), Fault::PortCount);
        let snapshot = enumerator(&host).enumerate().unwrap();

        let nodes: Vec<_> = snapshot.records().iter().map(|r| r.node.0.as_str()).collect();
        assert_eq!(nodes, vec!["1-1", "1-3", "2-2"]);
        assert!(snapshot.records()[0].is_hub);
        assert!(snapshot.children(2).is_empty());
        assert_eq!(snapshot.skipped()[0].stage, QueryStage::Ports);
        assert_eq!(snapshot.skipped()[0].hub_index, 2);
    }

    #[test]
    fn test_root_port_count_failure_keeps_root() {
        let host = nested_host();
        host.inject(&DevicePath::root(1), Fault::PortCount);
        let snapshot = enumerator(&host).enumerate().unwrap();

        assert_eq!(snapshot.roots().len(), 2);
        assert_eq!(snapshot.roots()[0].port_count, 0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].hub_index, 1);
    }

    #[test]
    fn test_hub_check_failure_omits_node_and_subtree() {
        let host = nested_host();
        host.inject(&DevicePath::new("1-1.4"), Fault::HubCheck);
        let snapshot = enumerator(&host).enumerate().unwrap();

        let nodes: Vec<_> = snapshot.records().iter().map(|r| r.node.0.as_str()).collect();
        assert_eq!(nodes, vec!["1-1", "1-1.2", "1-3", "2-2"]);
        assert_eq!(snapshot.skipped().len(), 1);
        let skipped = &snapshot.skipped()[0];
        assert_eq!(skipped.stage, QueryStage::HubCheck);
        assert_eq!(skipped.node, "1-1.4");
        assert_eq!(skipped.hub_index, 2);
        assert_eq!(skipped.port, Some(4));
        assert_eq!(snapshot.hub_count(), 3);
        assert_eq!(snapshot.validate(), Ok(()));
    }

    #[test]
    fn test_open_failure() {
        let host = nested_host();
        host.fail_open("no host controller driver");
        let err = enumerator(&host).enumerate().unwrap_err();
        assert!(matches!(err, EnumerationError::Initialization(_)));
        assert_eq!(host.open_sessions(), 0);
    }

    #[test]
    fn test_root_listing_failure_releases_session() {
        let host = nested_host();
        host.fail_root_listing("bus list unreadable");
        let err = enumerator(&host).enumerate().unwrap_err();
        assert!(matches!(err, EnumerationError::RootHubs(_)));
        assert_eq!(host.sessions_opened(), 1);
        assert_eq!(host.open_sessions(), 0);
    }

    #[test]
    fn test_session_released_after_each_pass() {
        let host = nested_host();
        host.inject(&DevicePath::new("1-3"), Fault::Speed);
        let enumerator = enumerator(&host);
        for _ in 0..3 {
            enumerator.enumerate().unwrap();
            assert_eq!(host.open_sessions(), 0);
        }
        assert_eq!(host.sessions_opened(), 3);
    }

    #[test]
    fn test_concurrent_calls_are_serialized() {
        let host = nested_host();
        host.set_latency(Duration::from_millis(2));
        let enumerator = Arc::new(enumerator(&host));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let enumerator = Arc::clone(&enumerator);
                thread::spawn(move || enumerator.enumerate().map(|s| s.len()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 6);
        }

        assert_eq!(host.sessions_opened(), 4);
        assert_eq!(host.peak_sessions(), 1);
        assert_eq!(host.open_sessions(), 0);
    }

    #[test]
    fn test_repeated_passes_are_identical() {
        let enumerator = enumerator(&nested_host());
        let first = enumerator.enumerate().unwrap();
        let second = enumerator.enumerate().unwrap();

        assert_eq!(tuples(&first), tuples(&second));
        assert_eq!(first.shape(), second.shape());
        assert_eq!(first.records(), second.records());
    }

    #[test]
    fn test_unplug_changes_only_affected_records() {
        let host = nested_host();
        let enumerator = enumerator(&host);
        let before = enumerator.enumerate().unwrap();
        host.unplug(&DevicePath::new("1-1.4"));
        let after = enumerator.enumerate().unwrap();

        assert_eq!(after.len(), before.len() - 2);
        assert_eq!(after.hub_count(), 3);
        assert_eq!(after.validate(), Ok(()));
    }

    #[test]
    fn test_depth_limit() {
        let host = MemoryHost::new();
        let mut parent = host.add_root(1, 1);
        for _ in 0..4 {
            parent = host.plug(&parent, 1, MemoryDevice::hub(0x05e3, 0x0610, 1));
        }
        host.plug(&parent, 1, MemoryDevice::new(0x1234, 0x5678));

        let options = WalkOptions { max_hub_depth: 2 };
        let snapshot = Enumerator::with_options(Box::new(host.clone()), options)
            .enumerate()
            .unwrap();

        // Two hubs descended, the third recorded but not walked.
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.records().iter().all(|r| r.is_hub));
        let skipped = &snapshot.skipped()[0];
        assert_eq!(skipped.stage, QueryStage::Ports);
        assert!(matches!(skipped.source, HostError::DepthLimit(2)));

        let unlimited = enumerator(&host).enumerate().unwrap();
        assert_eq!(unlimited.len(), 5);
        assert!(unlimited.warning().is_none());
    }

    #[test]
    fn test_max_port_number() {
        let host = MemoryHost::new();
        let root = host.add_root(1, 255);
        host.plug(&root, 255, MemoryDevice::new(1, 2));
        let snapshot = enumerator(&host).enumerate().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].port_number, 255);
    }
}
