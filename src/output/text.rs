//! Plain-text renderings of a snapshot.

use crate::config::Config;
use crate::model::{DeviceRecord, Snapshot};

const RULE_WIDTH: usize = 70;

/// Records grouped under a `[HUB n]` heading per hub, ascending hub index,
/// ports ascending within each hub.
pub fn grouped(snapshot: &Snapshot, config: &Config) -> String {
    let mut out = String::new();

    if snapshot.is_empty() {
        out.push_str("No USB devices found.\n");
        push_skipped(&mut out, snapshot);
        return out;
    }

    let rule = "=".repeat(RULE_WIDTH);
    out.push_str(&format!("{}\nUSB TOPOLOGY MAP\n{}\n", rule, rule));

    for (hub_index, records) in snapshot.grouped_by_hub() {
        out.push_str(&format!("\n[HUB {}]", hub_index));
        if let Some(heading) = hub_heading(snapshot, config, hub_index) {
            out.push_str(&format!(" {}", heading));
        }
        out.push('\n');

        for record in records {
            let (vid, pid) = record.display_ids();
            out.push_str(&format!("  Port {}:\n", record.port_number));
            out.push_str(&format!("    Description: {}\n", config.display_name(record)));
            out.push_str(&format!("    Speed: {}\n", record.speed));
            out.push_str(&format!("    VID: {}, PID: {}\n", vid, pid));
            out.push_str(&format!("    Type: {}\n", kind(record)));
        }
    }

    out.push_str(&format!("\n{}\n", rule));
    out.push_str(&format!(
        "{} device(s) on {} hub(s)\n",
        snapshot.len(),
        snapshot.hub_count()
    ));
    push_skipped(&mut out, snapshot);
    out
}

/// Indented depth-first tree under each root hub.
pub fn tree(snapshot: &Snapshot, config: &Config) -> String {
    let mut out = String::new();

    for root in snapshot.roots() {
        let label = config
            .hub_label(root)
            .map(|l| format!(" [{}]", l))
            .unwrap_or_default();
        out.push_str(&format!(
            "{} {}{} ({} ports, hub {})\n",
            root.node, root.description, label, root.port_count, root.index
        ));

        for (depth, record) in snapshot.subtree(root.index) {
            let indent = "  ".repeat(depth + 1);
            let icon = if record.is_hub { "Hub" } else { "Dev" };
            let hub_suffix = record
                .downstream_index
                .map(|i| format!(" -> hub {}", i))
                .unwrap_or_default();
            out.push_str(&format!(
                "{}[{}] {} {} ({}, {}){}\n",
                indent,
                record.port_number,
                icon,
                config.display_name(record),
                record.vid_pid(),
                record.speed.short_name(),
                hub_suffix
            ));
        }
    }

    if snapshot.roots().is_empty() {
        out.push_str("No USB root hubs found.\n");
    }
    push_skipped(&mut out, snapshot);
    out
}

fn kind(record: &DeviceRecord) -> &'static str {
    if record.is_hub {
        "Hub (cascaded)"
    } else {
        "Device"
    }
}

/// Root hub description and label, or the node of a nested hub.
fn hub_heading(snapshot: &Snapshot, config: &Config, hub_index: u32) -> Option<String> {
    if let Some(root) = snapshot.root(hub_index) {
        return Some(match config.hub_label(root) {
            Some(label) => format!("{} - {}", root.description, label),
            None => root.description.clone(),
        });
    }
    snapshot
        .hub_record(hub_index)
        .map(|hub| format!("{} at {}", config.display_name(hub), hub.node))
}

fn push_skipped(out: &mut String, snapshot: &Snapshot) {
    if let Some(warning) = snapshot.warning() {
        out.push_str(&format!("\nWarning: {}\n", warning));
        for error in snapshot.skipped() {
            out.push_str(&format!("  - {}\n", error));
        }
    }
}
