//! JSON renderings of a snapshot.

use crate::model::{DeviceRecord, RootHub, Snapshot};
use serde::Serialize;
use std::time::UNIX_EPOCH;

#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    hub_index: u32,
    port_number: u8,
    description: &'a str,
    device_path: &'a str,
    is_hub: bool,
    speed: String,
    vendor_id: String,
    product_id: String,
}

impl<'a> From<&'a DeviceRecord> for JsonRecord<'a> {
    fn from(record: &'a DeviceRecord) -> Self {
        let (vendor_id, product_id) = record.display_ids();
        Self {
            hub_index: record.hub_index,
            port_number: record.port_number,
            description: &record.description,
            device_path: &record.device_path,
            is_hub: record.is_hub,
            speed: record.speed.to_string(),
            vendor_id,
            product_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonDevice<'a> {
    #[serde(flatten)]
    record: JsonRecord<'a>,
    node: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    downstream_index: Option<u32>,
}

#[derive(Debug, Serialize)]
struct JsonRoot<'a> {
    index: u32,
    node: &'a str,
    description: &'a str,
    device_path: &'a str,
    port_count: u8,
}

impl<'a> From<&'a RootHub> for JsonRoot<'a> {
    fn from(root: &'a RootHub) -> Self {
        Self {
            index: root.index,
            node: &root.node.0,
            description: &root.description,
            device_path: &root.device_path,
            port_count: root.port_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonSkipped<'a> {
    hub_index: u32,
    port: Option<u8>,
    node: &'a str,
    stage: &'static str,
    error: String,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    /// Seconds since the Unix epoch.
    taken_at: u64,
    roots: Vec<JsonRoot<'a>>,
    devices: Vec<JsonDevice<'a>>,
    skipped: Vec<JsonSkipped<'a>>,
}

/// Flat array of records in snapshot order.
pub fn records(snapshot: &Snapshot) -> serde_json::Result<String> {
    let records: Vec<JsonRecord<'_>> = snapshot.records().iter().map(JsonRecord::from).collect();
    serde_json::to_string_pretty(&records)
}

/// Full snapshot: roots, devices with their host identifiers, and the
/// devices that were skipped.
pub fn report(snapshot: &Snapshot) -> serde_json::Result<String> {
    let report = JsonReport {
        taken_at: snapshot
            .taken_at()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        roots: snapshot.roots().iter().map(JsonRoot::from).collect(),
        devices: snapshot
            .records()
            .iter()
            .map(|record| JsonDevice {
                record: JsonRecord::from(record),
                node: &record.node.0,
                downstream_index: record.downstream_index,
            })
            .collect(),
        skipped: snapshot
            .skipped()
            .iter()
            .map(|e| JsonSkipped {
                hub_index: e.hub_index,
                port: e.port,
                node: &e.node,
                stage: e.stage.as_str(),
                error: e.source.to_string(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}
