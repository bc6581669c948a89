//! Error taxonomy for enumeration, host access and the record boundary.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a host USB stack primitive.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error for attribute '{0}': {1}")]
    Parse(String, String),
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),
    #[error("device {0} is no longer present")]
    Disconnected(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("hub chain deeper than {0} levels")]
    DepthLimit(usize),
    #[error("host USB stack unavailable: {0}")]
    Unavailable(String),
}

/// Fatal enumeration failures. Per-device problems never surface here.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("cannot initialize USB host access: {0}")]
    Initialization(#[source] HostError),
    #[error("cannot list USB root hubs: {0}")]
    RootHubs(#[source] HostError),
}

/// Which per-device query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStage {
    /// Checking whether a port has a device attached.
    Attach,
    /// Reading the device descriptor.
    Descriptor,
    /// Reading the negotiated link speed.
    Speed,
    /// Determining whether the device is a hub.
    HubCheck,
    /// Reading a hub's port count or descending into it.
    Ports,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Descriptor => "descriptor",
            Self::Speed => "speed",
            Self::HubCheck => "hub-check",
            Self::Ports => "ports",
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A device (or hub port walk) that was left out of a snapshot.
#[derive(Debug, Error)]
#[error("{stage} query failed for {node} (hub {hub_index}{}): {source}", port_suffix(.port))]
pub struct DeviceQueryError {
    /// Hub the device hangs off (or the hub whose ports could not be walked).
    pub hub_index: u32,
    /// Port on that hub, if the failure is tied to one.
    pub port: Option<u8>,
    /// Host node identifier.
    pub node: String,
    pub stage: QueryStage,
    #[source]
    pub source: HostError,
}

fn port_suffix(port: &Option<u8>) -> String {
    match port {
        Some(p) => format!(", port {}", p),
        None => String::new(),
    }
}

/// Non-fatal summary attached to a snapshot that skipped devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{skipped} device(s) skipped during enumeration")]
pub struct PartialEnumerationWarning {
    pub skipped: usize,
}

/// Index-based access outside `0..count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("device index {index} out of range (count {count})")]
pub struct OutOfRangeError {
    pub index: i64,
    pub count: usize,
}

/// No usable host backend could be located.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no USB host backend found; searched: {}", join_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },
    #[error("USB host backend at {} is unusable: {reason}", .path.display())]
    Unusable { path: PathBuf, reason: String },
}

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no candidates configured)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Broken snapshot invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyViolation {
    #[error("record {record} references hub {hub_index}, which is neither a root nor a hub record")]
    DanglingHub { record: usize, hub_index: u32 },
    #[error("port {port} of hub {hub_index} is used by more than one record")]
    DuplicatePort { hub_index: u32, port: u8 },
    #[error("record {record} has port number 0 (ports are 1-based)")]
    PortZero { record: usize },
    #[error("hub index {0} is assigned more than once")]
    DuplicateHubIndex(u32),
    #[error("hub {0} is its own ancestor")]
    Cycle(u32),
    #[error("record {record} carries a hub index but is not a hub")]
    IndexOnLeaf { record: usize },
}
