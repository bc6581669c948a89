//! TUI application state.

use crate::config::Config;
use crate::model::{DevicePath, DeviceRecord, RootHub, ShapeEntry, Snapshot};
use std::collections::HashSet;
use std::time::Instant;

/// TUI application state.
pub struct App {
    /// Latest snapshot.
    pub snapshot: Snapshot,
    /// Configuration.
    pub config: Config,
    /// Currently selected item index.
    pub selected: usize,
    /// Collapsed nodes (expanded if not in set).
    pub collapsed: HashSet<String>,
    /// Show help overlay.
    pub show_help: bool,
    /// Last time a pass was requested.
    pub last_refresh: Instant,
    /// Whether to auto-refresh.
    pub auto_refresh: bool,
    /// A pass has been requested and not yet delivered.
    pub refresh_pending: bool,
    /// Node of the selected item, kept across refreshes.
    pub selected_node: Option<DevicePath>,

    // --- Discovery tracking ---
    /// Devices present at app startup.
    pub startup_devices: HashSet<ShapeEntry>,
    /// Devices discovered during session (in order).
    pub discovery_order: Vec<ShapeEntry>,
    /// Devices marked as "seen" (clears NEW indicator).
    pub seen_devices: HashSet<ShapeEntry>,

    // --- Status ---
    /// Message of the last failed pass, cleared by the next good one.
    pub last_error: Option<String>,
    /// Temporary status message to display.
    pub status_message: Option<(String, Instant)>,
}

impl App {
    pub fn new(snapshot: Snapshot, config: Config) -> Self {
        let startup_devices = snapshot.shape().into_iter().collect();
        let mut app = Self {
            snapshot,
            config,
            selected: 0,
            collapsed: HashSet::new(),
            show_help: false,
            last_refresh: Instant::now(),
            auto_refresh: true,
            refresh_pending: false,
            selected_node: None,
            startup_devices,
            discovery_order: Vec::new(),
            seen_devices: HashSet::new(),
            last_error: None,
            status_message: None,
        };
        app.update_selected_node();
        app
    }

    /// Replace the snapshot after a successful pass.
    pub fn update_snapshot(&mut self, snapshot: Snapshot) {
        for entry in snapshot.shape() {
            if !self.startup_devices.contains(&entry) && !self.discovery_order.contains(&entry) {
                self.discovery_order.push(entry);
            }
        }
        self.snapshot = snapshot;
        self.refresh_pending = false;
        self.last_error = None;
        self.restore_selection();
    }

    /// Record a failed pass; the previous snapshot stays on screen.
    pub fn refresh_failed(&mut self, message: String) {
        self.refresh_pending = false;
        self.last_error = Some(message);
    }

    /// Whether the auto-refresh interval has elapsed.
    pub fn refresh_due(&self, refresh_ms: u64) -> bool {
        self.auto_refresh
            && !self.refresh_pending
            && self.last_refresh.elapsed().as_millis() >= u128::from(refresh_ms)
    }

    /// Note that a pass was requested.
    pub fn refresh_requested(&mut self) {
        self.refresh_pending = true;
        self.last_refresh = Instant::now();
    }

    /// Check if a device is "new" (discovered this session and not yet seen).
    pub fn is_new_device(&self, entry: &ShapeEntry) -> bool {
        !self.startup_devices.contains(entry) && !self.seen_devices.contains(entry)
    }

    /// Get discovery order number for a device (1-indexed), if new.
    pub fn discovery_number(&self, entry: &ShapeEntry) -> Option<usize> {
        if self.is_new_device(entry) {
            self.discovery_order
                .iter()
                .position(|e| e == entry)
                .map(|i| i + 1)
        } else {
            None
        }
    }

    /// Get count of new devices currently present.
    pub fn new_device_count(&self) -> usize {
        self.snapshot
            .shape()
            .iter()
            .filter(|e| self.is_new_device(e))
            .count()
    }

    /// Mark the selected device as seen (clears its NEW indicator).
    pub fn mark_selected_seen(&mut self) {
        if let Some(entry) = self.selected_record().and_then(|r| self.snapshot.shape_of(r)) {
            self.seen_devices.insert(entry);
        }
    }

    /// Set a status message (auto-clears after a few seconds).
    pub fn set_status(&mut self, msg: String) {
        self.status_message = Some((msg, Instant::now()));
    }

    /// Get current status message if not expired.
    pub fn status(&self) -> Option<&str> {
        self.status_message.as_ref().and_then(|(msg, time)| {
            if time.elapsed().as_secs() < 3 {
                Some(msg.as_str())
            } else {
                None
            }
        })
    }

    /// Toggle expansion of selected item.
    pub fn toggle_expand(&mut self) {
        let items = self.visible_items();
        if let Some(item) = items.get(self.selected)
            && item.has_children()
        {
            let key = item.key();
            if !self.collapsed.remove(&key) {
                self.collapsed.insert(key);
            }
        }
    }

    /// Collapse everything, or expand everything if anything is collapsed.
    pub fn toggle_expand_all(&mut self) {
        if self.collapsed.is_empty() {
            let roots = self.snapshot.roots().iter().map(|r| r.node.0.clone());
            let hubs = self
                .snapshot
                .records()
                .iter()
                .filter(|r| r.is_hub)
                .map(|r| r.node.0.clone());
            self.collapsed = roots.chain(hubs).collect();
        } else {
            self.collapsed.clear();
        }
        self.restore_selection();
    }

    /// Move selection up/down.
    pub fn move_selection(&mut self, delta: i32) {
        let len = self.visible_items().len();
        if len == 0 {
            return;
        }

        self.selected = if delta < 0 {
            self.selected.saturating_sub(delta.unsigned_abs() as usize)
        } else {
            (self.selected + delta as usize).min(len - 1)
        };
        self.update_selected_node();
    }

    /// Jump to top.
    pub fn goto_top(&mut self) {
        self.selected = 0;
        self.update_selected_node();
    }

    /// Jump to bottom.
    pub fn goto_bottom(&mut self) {
        let len = self.visible_items().len();
        self.selected = len.saturating_sub(1);
        self.update_selected_node();
    }

    fn update_selected_node(&mut self) {
        self.selected_node = self.visible_items().get(self.selected).map(TreeItem::node);
    }

    /// Keep the same node selected after the item list changed.
    fn restore_selection(&mut self) {
        let items = self.visible_items();
        if let Some(node) = &self.selected_node
            && let Some(pos) = items.iter().position(|item| &item.node() == node)
        {
            self.selected = pos;
            return;
        }
        self.selected = self.selected.min(items.len().saturating_sub(1));
        self.selected_node = items.get(self.selected).map(TreeItem::node);
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        !self.collapsed.contains(key)
    }

    /// Get visible tree items based on expansion state.
    pub fn visible_items(&self) -> Vec<TreeItem> {
        let mut items = Vec::new();

        for root in self.snapshot.roots() {
            items.push(self.root_item(root));
            if !self.is_expanded(&root.node.0) {
                continue;
            }

            // Depth below which records are hidden by a collapsed hub.
            let mut hidden_below: Option<usize> = None;
            for (depth, record) in self.snapshot.subtree(root.index) {
                if let Some(limit) = hidden_below {
                    if depth > limit {
                        continue;
                    }
                    hidden_below = None;
                }
                if record.is_hub && !self.is_expanded(&record.node.0) {
                    hidden_below = Some(depth);
                }
                items.push(self.device_item(record, depth + 1));
            }
        }

        items
    }

    fn root_item(&self, root: &RootHub) -> TreeItem {
        TreeItem::Root {
            index: root.index,
            node: root.node.clone(),
            label: self
                .config
                .hub_label(root)
                .map(str::to_string)
                .unwrap_or_else(|| root.description.clone()),
            port_count: root.port_count,
            has_children: !self.snapshot.children(root.index).is_empty(),
        }
    }

    fn device_item(&self, record: &DeviceRecord, depth: usize) -> TreeItem {
        let shape = self.snapshot.shape_of(record);
        let is_new = shape.as_ref().is_some_and(|s| self.is_new_device(s));
        let discovery_number = shape.as_ref().and_then(|s| self.discovery_number(s));

        TreeItem::Device {
            node: record.node.clone(),
            label: self.config.display_name(record),
            is_hub: record.is_hub,
            port_number: record.port_number,
            vid_pid: record.vid_pid(),
            speed_name: record.speed.short_name().to_string(),
            depth,
            has_children: record
                .downstream_index
                .is_some_and(|i| !self.snapshot.children(i).is_empty()),
            is_new,
            discovery_number,
        }
    }

    /// Get the currently selected record (if any).
    pub fn selected_record(&self) -> Option<&DeviceRecord> {
        let node = self.selected_node.as_ref()?;
        self.snapshot.records().iter().find(|r| &r.node == node)
    }

    /// Get the currently selected root hub (if any).
    pub fn selected_root(&self) -> Option<&RootHub> {
        let node = self.selected_node.as_ref()?;
        self.snapshot.roots().iter().find(|r| &r.node == node)
    }

    /// Get device count string.
    pub fn device_count_str(&self) -> String {
        format!(
            "{} devices on {} hubs",
            self.snapshot.len(),
            self.snapshot.hub_count()
        )
    }
}

/// Tree item types for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeItem {
    Root {
        index: u32,
        node: DevicePath,
        label: String,
        port_count: u8,
        has_children: bool,
    },
    Device {
        node: DevicePath,
        label: String,
        is_hub: bool,
        port_number: u8,
        vid_pid: String,
        speed_name: String,
        depth: usize,
        has_children: bool,
        /// Is this a "new" device (discovered this session, not yet seen)?
        is_new: bool,
        /// Discovery order number (1-indexed) if new.
        discovery_number: Option<usize>,
    },
}

impl TreeItem {
    /// Get unique key for expansion tracking.
    pub fn key(&self) -> String {
        self.node().0
    }

    pub fn node(&self) -> DevicePath {
        match self {
            TreeItem::Root { node, .. } | TreeItem::Device { node, .. } => node.clone(),
        }
    }

    /// Get depth for indentation.
    pub fn depth(&self) -> usize {
        match self {
            TreeItem::Root { .. } => 0,
            TreeItem::Device { depth, .. } => *depth,
        }
    }

    pub fn has_children(&self) -> bool {
        match self {
            TreeItem::Root { has_children, .. } | TreeItem::Device { has_children, .. } => {
                *has_children
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::snapshot::tests::{hub, record, root};

    /// usb1: 1 -> hub(2) {1 -> dev}, 2 -> dev
    /// usb2: empty
    fn snapshot() -> Snapshot {
        Snapshot::from_parts(
            vec![root(0, 1), root(1, 2)],
            vec![
                hub(0, 1, "1-1", 2),
                record(2, 1, "1-1.1", 0x1111, 0x0001),
                record(0, 2, "1-2", 0x046d, 0xc52b),
            ],
            Vec::new(),
        )
    }

    fn keys(app: &App) -> Vec<String> {
        app.visible_items().iter().map(TreeItem::key).collect()
    }

    #[test]
    fn test_all_expanded_by_default() {
        let app = App::new(snapshot(), Config::default());
        assert_eq!(keys(&app), vec!["usb1", "1-1", "1-1.1", "1-2", "usb2"]);
        assert_eq!(app.selected_node, Some(DevicePath::root(1)));
        assert!(app.selected_root().is_some());
        assert_eq!(app.visible_items()[2].depth(), 2);
    }

    #[test]
    fn test_collapse_hub_hides_subtree() {
        let mut app = App::new(snapshot(), Config::default());
        app.move_selection(1);
        assert_eq!(app.selected_record().unwrap().node.0, "1-1");
        app.toggle_expand();
        assert_eq!(keys(&app), vec!["usb1", "1-1", "1-2", "usb2"]);

        app.toggle_expand();
        assert_eq!(keys(&app).len(), 5);
    }

    #[test]
    fn test_leaf_and_empty_root_do_not_collapse() {
        let mut app = App::new(snapshot(), Config::default());
        app.goto_bottom();
        app.toggle_expand();
        assert!(app.collapsed.is_empty());
    }

    #[test]
    fn test_collapse_all() {
        let mut app = App::new(snapshot(), Config::default());
        app.toggle_expand_all();
        assert_eq!(keys(&app), vec!["usb1", "usb2"]);
        app.toggle_expand_all();
        assert_eq!(keys(&app).len(), 5);
    }

    #[test]
    fn test_new_devices_marked() {
        let mut app = App::new(snapshot(), Config::default());
        assert_eq!(app.new_device_count(), 0);

        let updated = Snapshot::from_parts(
            vec![root(0, 1), root(1, 2)],
            vec![
                hub(0, 1, "1-1", 2),
                record(2, 1, "1-1.1", 0x1111, 0x0001),
                record(0, 2, "1-2", 0x046d, 0xc52b),
                record(1, 3, "2-3", 0x0bda, 0x8153),
            ],
            Vec::new(),
        );
        app.update_snapshot(updated);
        assert_eq!(app.new_device_count(), 1);

        let items = app.visible_items();
        let new_item = items.iter().find(|i| i.key() == "2-3").unwrap();
        assert!(matches!(
            new_item,
            TreeItem::Device {
                is_new: true,
                discovery_number: Some(1),
                ..
            }
        ));

        app.goto_bottom();
        app.mark_selected_seen();
        assert_eq!(app.new_device_count(), 0);
    }

    #[test]
    fn test_selection_survives_refresh() {
        let mut app = App::new(snapshot(), Config::default());
        app.move_selection(3);
        assert_eq!(app.selected_node, Some(DevicePath::new("1-2")));

        // The hub's child disappears; 1-2 moves up one row.
        app.update_snapshot(Snapshot::from_parts(
            vec![root(0, 1), root(1, 2)],
            vec![hub(0, 1, "1-1", 2), record(0, 2, "1-2", 0x046d, 0xc52b)],
            Vec::new(),
        ));
        assert_eq!(app.selected, 2);
        assert_eq!(app.selected_record().unwrap().node.0, "1-2");
    }

    #[test]
    fn test_failed_refresh_keeps_snapshot() {
        let mut app = App::new(snapshot(), Config::default());
        app.refresh_requested();
        assert!(!app.refresh_due(0));

        app.refresh_failed("cannot list USB root hubs".to_string());
        assert_eq!(app.snapshot.len(), 3);
        assert!(app.last_error.is_some());
        assert!(app.refresh_due(0));

        app.update_snapshot(snapshot());
        assert!(app.last_error.is_none());
    }
}
