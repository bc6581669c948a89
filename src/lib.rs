//! USB Topology Enumerator
//!
//! A library and CLI tool that walks the host's USB controllers and hubs and
//! reports every attached device with its position in the hub tree.

pub mod boundary;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod host;
pub mod logging;
pub mod model;
pub mod output;
pub mod sysfs;
pub mod ui;

pub use boundary::{DeviceTable, RawDeviceRecord};
pub use config::Config;
pub use enumerator::{Enumerator, WalkOptions};
pub use error::{
    DeviceQueryError, EnumerationError, HostError, LoadError, OutOfRangeError,
    PartialEnumerationWarning, TopologyViolation,
};
pub use host::{HostLocator, HostSession, UsbHost};
pub use model::{DevicePath, DeviceRecord, LinkSpeed, RootHub, Snapshot};
pub use sysfs::{SysfsHost, SysfsLocator};
