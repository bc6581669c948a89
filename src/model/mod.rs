//! USB topology data model types.

pub mod record;
pub mod snapshot;
pub mod speed;

pub use record::{DevicePath, DeviceRecord, RootHub};
pub use snapshot::{ShapeEntry, Snapshot};
pub use speed::LinkSpeed;
