//! Fixed-layout records and index-based access to the latest snapshot.
//!
//! [`RawDeviceRecord`] mirrors the C struct consumers of the enumerator
//! expect: two bounded NUL-terminated text buffers and plain integers, so a
//! record can be copied across a language boundary without any pointers.

use crate::enumerator::Enumerator;
use crate::error::{EnumerationError, OutOfRangeError};
use crate::model::{DeviceRecord, LinkSpeed, Snapshot};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Size of the description buffer, terminator included.
pub const DESCRIPTION_CAPACITY: usize = 256;

/// Size of the device path buffer, terminator included.
pub const PATH_CAPACITY: usize = 512;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawDeviceRecord {
    pub hub_index: i32,
    pub port_number: i32,
    pub description: [u8; DESCRIPTION_CAPACITY],
    pub device_path: [u8; PATH_CAPACITY],
    pub is_hub: i32,
    /// [`LinkSpeed::code`]: 0 low, 1 full, 2 high, 3 super, -1 unknown.
    pub speed: i32,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for RawDeviceRecord {
    fn default() -> Self {
        Self {
            hub_index: 0,
            port_number: 0,
            description: [0; DESCRIPTION_CAPACITY],
            device_path: [0; PATH_CAPACITY],
            is_hub: 0,
            speed: LinkSpeed::Unknown.code(),
            vendor_id: 0,
            product_id: 0,
        }
    }
}

impl std::fmt::Debug for RawDeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDeviceRecord")
            .field("hub_index", &self.hub_index)
            .field("port_number", &self.port_number)
            .field("description", &self.description())
            .field("device_path", &self.device_path())
            .field("is_hub", &self.is_hub)
            .field("speed", &self.speed)
            .field("vendor_id", &format_args!("0x{:04X}", self.vendor_id))
            .field("product_id", &format_args!("0x{:04X}", self.product_id))
            .finish()
    }
}

impl RawDeviceRecord {
    pub fn from_record(record: &DeviceRecord) -> Self {
        let mut raw = Self {
            hub_index: i32::try_from(record.hub_index).unwrap_or(i32::MAX),
            port_number: i32::from(record.port_number),
            is_hub: i32::from(record.is_hub),
            speed: record.speed.code(),
            vendor_id: record.vendor_id,
            product_id: record.product_id,
            ..Self::default()
        };
        copy_truncated(&mut raw.description, &record.description);
        copy_truncated(&mut raw.device_path, &record.device_path);
        raw
    }

    /// Description text up to the first NUL.
    pub fn description(&self) -> String {
        read_terminated(&self.description)
    }

    /// Device path text up to the first NUL.
    pub fn device_path(&self) -> String {
        read_terminated(&self.device_path)
    }

    pub fn link_speed(&self) -> LinkSpeed {
        LinkSpeed::from_code(self.speed)
    }

    pub fn is_hub(&self) -> bool {
        self.is_hub != 0
    }
}

impl From<&DeviceRecord> for RawDeviceRecord {
    fn from(record: &DeviceRecord) -> Self {
        Self::from_record(record)
    }
}

/// Copy `text` into `buf`, NUL-terminated, cut at a char boundary if needed.
fn copy_truncated(buf: &mut [u8], text: &str) {
    let max = buf.len().saturating_sub(1);
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buf[..end].copy_from_slice(&text.as_bytes()[..end]);
    buf[end..].fill(0);
}

fn read_terminated(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Count-then-fetch access to the most recent enumeration.
///
/// The table only holds the latest snapshot; it never enumerates on its
/// own. Lookups outside the snapshot fail without touching it.
#[derive(Debug)]
pub struct DeviceTable {
    enumerator: Enumerator,
    /// Held from the start of a pass until its result is stored.
    pass: Mutex<()>,
    latest: Mutex<Arc<Snapshot>>,
}

impl DeviceTable {
    pub fn new(enumerator: Enumerator) -> Self {
        Self {
            enumerator,
            pass: Mutex::new(()),
            latest: Mutex::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Run a fresh enumeration and make it the latest snapshot.
    ///
    /// On failure the latest snapshot becomes empty, so a stale count is
    /// never served after a failed pass.
    pub fn enumerate(&self) -> Result<usize, EnumerationError> {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.enumerator.enumerate();
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(snapshot) => {
                let count = snapshot.len();
                *latest = Arc::new(snapshot);
                Ok(count)
            }
            Err(e) => {
                debug!("Enumeration failed, clearing device table");
                *latest = Arc::new(Snapshot::empty());
                Err(e)
            }
        }
    }

    /// Number of records in the latest snapshot (0 before any enumeration).
    pub fn device_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn device_record(&self, index: i64) -> Result<RawDeviceRecord, OutOfRangeError> {
        let snapshot = self.snapshot();
        let count = snapshot.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| snapshot.get(i))
            .map(RawDeviceRecord::from_record)
            .ok_or(OutOfRangeError { index, count })
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.latest.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
