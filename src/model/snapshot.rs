//! Immutable result of one enumeration pass.

use super::record::{DevicePath, DeviceRecord, RootHub};
use crate::error::{DeviceQueryError, PartialEnumerationWarning, TopologyViolation};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::SystemTime;

/// Index-independent identity of a record: where it sits relative to its
/// root hub and what it reports itself as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeEntry {
    pub root: DevicePath,
    /// Ports traversed from the root hub down to this record.
    pub ports: Vec<u8>,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Every device and hub reachable at one point in time.
///
/// Records are kept in discovery order: root hubs in host order, each walked
/// depth-first with ports ascending. A snapshot is never patched; a new
/// enumeration produces a new snapshot.
#[derive(Debug)]
pub struct Snapshot {
    roots: Vec<RootHub>,
    records: Vec<DeviceRecord>,
    skipped: Vec<DeviceQueryError>,
    taken_at: SystemTime,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// Assemble a snapshot. No validation happens here; see [`Snapshot::validate`].
    pub fn from_parts(
        roots: Vec<RootHub>,
        records: Vec<DeviceRecord>,
        skipped: Vec<DeviceQueryError>,
    ) -> Self {
        Self {
            roots,
            records,
            skipped,
            taken_at: SystemTime::now(),
        }
    }

    /// A snapshot with no hubs and no devices.
    pub fn empty() -> Self {
        Self::from_parts(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn roots(&self) -> &[RootHub] {
        &self.roots
    }

    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Devices omitted from this snapshot and why.
    pub fn skipped(&self) -> &[DeviceQueryError] {
        &self.skipped
    }

    pub fn taken_at(&self) -> SystemTime {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceRecord> {
        self.records.get(index)
    }

    /// Present when at least one device was skipped.
    pub fn warning(&self) -> Option<PartialEnumerationWarning> {
        if self.skipped.is_empty() {
            None
        } else {
            Some(PartialEnumerationWarning {
                skipped: self.skipped.len(),
            })
        }
    }

    /// Root hub with the given hub index.
    pub fn root(&self, index: u32) -> Option<&RootHub> {
        self.roots.iter().find(|r| r.index == index)
    }

    /// The hub record whose downstream ports carry `index`.
    pub fn hub_record(&self, index: u32) -> Option<&DeviceRecord> {
        self.records
            .iter()
            .find(|r| r.downstream_index == Some(index))
    }

    /// Total number of hubs, roots included.
    pub fn hub_count(&self) -> usize {
        self.roots.len() + self.records.iter().filter(|r| r.is_hub).count()
    }

    /// Records attached to a hub, sorted by port.
    pub fn children(&self, hub_index: u32) -> Vec<&DeviceRecord> {
        let mut children: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.hub_index == hub_index)
            .collect();
        children.sort_by_key(|r| r.port_number);
        children
    }

    /// Records grouped by parent hub index, each group sorted by port.
    pub fn grouped_by_hub(&self) -> BTreeMap<u32, Vec<&DeviceRecord>> {
        let mut groups: BTreeMap<u32, Vec<&DeviceRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.hub_index).or_default().push(record);
        }
        for group in groups.values_mut() {
            group.sort_by_key(|r| r.port_number);
        }
        groups
    }

    /// Records reachable from the root hubs, depth-first, with their depth
    /// (0 = attached to a root hub).
    pub fn tree_order(&self) -> Vec<(usize, &DeviceRecord)> {
        self.roots
            .iter()
            .flat_map(|root| self.subtree(root.index))
            .collect()
    }

    /// Records below a hub, depth-first with ports ascending, with their
    /// depth relative to that hub.
    pub fn subtree(&self, hub_index: u32) -> Vec<(usize, &DeviceRecord)> {
        let groups = self.grouped_by_hub();
        let mut result = Vec::new();
        let mut visited = HashSet::from([hub_index]);
        let mut stack: Vec<(usize, &DeviceRecord)> = groups
            .get(&hub_index)
            .map(|children| children.iter().rev().map(|r| (0, *r)).collect())
            .unwrap_or_default();

        while let Some((depth, record)) = stack.pop() {
            result.push((depth, record));
            if let Some(index) = record.downstream_index
                && visited.insert(index)
                && let Some(children) = groups.get(&index)
            {
                stack.extend(children.iter().rev().map(|r| (depth + 1, *r)));
            }
        }

        result
    }

    /// Root hub and port chain leading to a record.
    pub fn path_to_root(&self, record: &DeviceRecord) -> Option<(&RootHub, Vec<u8>)> {
        let mut ports = vec![record.port_number];
        let mut hub_index = record.hub_index;

        // Bounded by the record count so a cyclic snapshot still terminates.
        for _ in 0..=self.records.len() {
            if let Some(root) = self.root(hub_index) {
                ports.reverse();
                return Some((root, ports));
            }
            let parent = self.hub_record(hub_index)?;
            ports.push(parent.port_number);
            hub_index = parent.hub_index;
        }
        None
    }

    /// Index-independent identity of one record.
    pub fn shape_of(&self, record: &DeviceRecord) -> Option<ShapeEntry> {
        self.path_to_root(record).map(|(root, ports)| ShapeEntry {
            root: root.node.clone(),
            ports,
            vendor_id: record.vendor_id,
            product_id: record.product_id,
        })
    }

    /// Sorted shape of the whole snapshot, for comparing two passes without
    /// depending on hub index assignment.
    pub fn shape(&self) -> Vec<ShapeEntry> {
        let mut shape: Vec<_> = self
            .records
            .iter()
            .filter_map(|r| self.shape_of(r))
            .collect();
        shape.sort();
        shape
    }

    /// Check the forest invariants.
    pub fn validate(&self) -> Result<(), TopologyViolation> {
        // Hub index -> parent hub index (None for roots).
        let mut hubs: HashMap<u32, Option<u32>> = HashMap::new();
        for root in &self.roots {
            if hubs.insert(root.index, None).is_some() {
                return Err(TopologyViolation::DuplicateHubIndex(root.index));
            }
        }
        for (i, record) in self.records.iter().enumerate() {
            match record.downstream_index {
                Some(_) if !record.is_hub => {
                    return Err(TopologyViolation::IndexOnLeaf { record: i });
                }
                Some(index) => {
                    if hubs.insert(index, Some(record.hub_index)).is_some() {
                        return Err(TopologyViolation::DuplicateHubIndex(index));
                    }
                }
                None => {}
            }
        }

        let mut ports = HashSet::new();
        for (i, record) in self.records.iter().enumerate() {
            if record.port_number == 0 {
                return Err(TopologyViolation::PortZero { record: i });
            }
            if !hubs.contains_key(&record.hub_index) {
                return Err(TopologyViolation::DanglingHub {
                    record: i,
                    hub_index: record.hub_index,
                });
            }
            if !ports.insert((record.hub_index, record.port_number)) {
                return Err(TopologyViolation::DuplicatePort {
                    hub_index: record.hub_index,
                    port: record.port_number,
                });
            }
        }

        for &start in hubs.keys() {
            let mut current = start;
            let mut steps = 0;
            while let Some(Some(parent)) = hubs.get(&current) {
                current = *parent;
                steps += 1;
                if current == start || steps > hubs.len() {
                    return Err(TopologyViolation::Cycle(start));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::LinkSpeed;

    pub(crate) fn root(index: u32, bus: u8) -> RootHub {
        RootHub {
            index,
            node: DevicePath::root(bus),
            description: format!("Root hub {}", bus),
            device_path: format!("/sys/bus/usb/devices/usb{}", bus),
            port_count: 4,
        }
    }

    pub(crate) fn record(hub_index: u32, port: u8, node: &str, vid: u16, pid: u16) -> DeviceRecord {
        DeviceRecord {
            hub_index,
            port_number: port,
            description: format!("Device {}", node),
            device_path: format!("/sys/bus/usb/devices/{}", node),
            is_hub: false,
            speed: LinkSpeed::High,
            vendor_id: vid,
            product_id: pid,
            node: DevicePath::new(node),
            downstream_index: None,
        }
    }

    pub(crate) fn hub(hub_index: u32, port: u8, node: &str, own: u32) -> DeviceRecord {
        DeviceRecord {
            is_hub: true,
            downstream_index: Some(own),
            ..record(hub_index, port, node, 0x05e3, 0x0610)
        }
    }

    /// usb1: port 1 -> hub(2) {port 3 -> dev, port 1 -> dev}, port 2 -> dev
    /// usb2: port 1 -> dev
    fn sample() -> Snapshot {
        Snapshot::from_parts(
            vec![root(0, 1), root(1, 2)],
            vec![
                hub(0, 1, "1-1", 2),
                record(2, 3, "1-1.3", 0x1111, 0x0003),
                record(2, 1, "1-1.1", 0x1111, 0x0001),
                record(0, 2, "1-2", 0x046d, 0xc52b),
                record(1, 1, "2-1", 0x0bda, 0x8153),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_sample_is_valid() {
        let snapshot = sample();
        assert_eq!(snapshot.validate(), Ok(()));
        assert_eq!(snapshot.hub_count(), 3);
        assert!(snapshot.warning().is_none());
    }

    #[test]
    fn test_grouped_by_hub_sorts_ports() {
        let snapshot = sample();
        let groups = snapshot.grouped_by_hub();
        let keys: Vec<_> = groups.keys().copied().collect();
        assert_eq!(keys, vec![0, 1, 2]);
        let ports: Vec<_> = groups[&2].iter().map(|r| r.port_number).collect();
        assert_eq!(ports, vec![1, 3]);
    }

    #[test]
    fn test_tree_order_is_depth_first() {
        let snapshot = sample();
        let order: Vec<_> = snapshot
            .tree_order()
            .into_iter()
            .map(|(depth, r)| (depth, r.node.0.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, "1-1"),
                (1, "1-1.1"),
                (1, "1-1.3"),
                (0, "1-2"),
                (0, "2-1"),
            ]
        );

        let below_hub: Vec<_> = snapshot
            .subtree(2)
            .into_iter()
            .map(|(depth, r)| (depth, r.node.0.as_str()))
            .collect();
        assert_eq!(below_hub, vec![(0, "1-1.1"), (0, "1-1.3")]);
    }

    #[test]
    fn test_shape_ignores_hub_numbering() {
        let a = sample();
        let b = Snapshot::from_parts(
            vec![root(0, 1), root(1, 2)],
            vec![
                hub(0, 1, "1-1", 9),
                record(9, 1, "1-1.1", 0x1111, 0x0001),
                record(9, 3, "1-1.3", 0x1111, 0x0003),
                record(0, 2, "1-2", 0x046d, 0xc52b),
                record(1, 1, "2-1", 0x0bda, 0x8153),
            ],
            Vec::new(),
        );
        assert_eq!(a.shape(), b.shape());

        let deep = a.records().iter().find(|r| r.node.0 == "1-1.3").unwrap();
        let entry = a.shape_of(deep).unwrap();
        assert_eq!(entry.root, DevicePath::root(1));
        assert_eq!(entry.ports, vec![1, 3]);
    }

    #[test]
    fn test_validate_dangling_hub() {
        let snapshot = Snapshot::from_parts(
            vec![root(0, 1)],
            vec![record(5, 1, "1-1", 1, 1)],
            Vec::new(),
        );
        assert_eq!(
            snapshot.validate(),
            Err(TopologyViolation::DanglingHub {
                record: 0,
                hub_index: 5
            })
        );
    }

    #[test]
    fn test_validate_leaf_cannot_parent() {
        // Index on a non-hub record.
        let mut leaf = record(0, 1, "1-1", 1, 1);
        leaf.downstream_index = Some(1);
        let snapshot = Snapshot::from_parts(vec![root(0, 1)], vec![leaf], Vec::new());
        assert_eq!(
            snapshot.validate(),
            Err(TopologyViolation::IndexOnLeaf { record: 0 })
        );
    }

    #[test]
    fn test_validate_duplicate_port() {
        let snapshot = Snapshot::from_parts(
            vec![root(0, 1)],
            vec![record(0, 2, "1-2", 1, 1), record(0, 2, "1-2", 2, 2)],
            Vec::new(),
        );
        assert_eq!(
            snapshot.validate(),
            Err(TopologyViolation::DuplicatePort {
                hub_index: 0,
                port: 2
            })
        );
    }

    #[test]
    fn test_validate_port_zero() {
        let snapshot = Snapshot::from_parts(
            vec![root(0, 1)],
            vec![record(0, 0, "1-0", 1, 1)],
            Vec::new(),
        );
        assert_eq!(
            snapshot.validate(),
            Err(TopologyViolation::PortZero { record: 0 })
        );
    }

    #[test]
    fn test_validate_cycle() {
        // Hubs 1 and 2 hang off each other; neither reaches a root.
        let snapshot = Snapshot::from_parts(
            vec![root(0, 1)],
            vec![hub(2, 1, "1-1", 1), hub(1, 1, "1-1.1", 2)],
            Vec::new(),
        );
        assert!(matches!(
            snapshot.validate(),
            Err(TopologyViolation::Cycle(_))
        ));
        assert!(snapshot.tree_order().is_empty());
        assert!(snapshot.shape().is_empty());
    }

    #[test]
    fn test_validate_duplicate_hub_index() {
        let snapshot = Snapshot::from_parts(
            vec![root(0, 1)],
            vec![hub(0, 1, "1-1", 0)],
            Vec::new(),
        );
        assert_eq!(
            snapshot.validate(),
            Err(TopologyViolation::DuplicateHubIndex(0))
        );
    }
}
